//! A compact text adventure played one mesh message at a time.
//!
//! Each user (not each channel) gets their own game, held in memory until they `quit`.
//! The world is small and built in: a trailhead, a forest, a shed with a key, a cave
//! that needs the lamp, a locked vault, and a thief who sometimes grabs an item and
//! hides it in his den.
//!
//! Input is lowercased, split on ` and ` into separate commands, and each command is
//! read as `verb [noun [prep]]`. `n/s/e/w/u/d` are direction abbreviations.
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::CommandHandler;
use crate::meshtastic::Target;

pub const USAGE: &str = "Usage: zork start|quit|<command>";
const MAX_WEIGHT: u32 = 10;
const MAX_SCORE: u32 = 25;
const START_ROOM: usize = 1;
const THIEF_ROOM: usize = 7;
const VAULT_ROOM: usize = 6;
const LOCKED_ROOM: usize = 5;
const LOCKED_EXIT: Dir = Dir::East;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dir {
    North,
    South,
    East,
    West,
    Up,
    Down,
}

impl Dir {
    fn parse(word: &str) -> Option<Dir> {
        Some(match word {
            "n" | "north" => Dir::North,
            "s" | "south" => Dir::South,
            "e" | "east" => Dir::East,
            "w" | "west" => Dir::West,
            "u" | "up" => Dir::Up,
            "d" | "down" => Dir::Down,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Dir::North => "north",
            Dir::South => "south",
            Dir::East => "east",
            Dir::West => "west",
            Dir::Up => "up",
            Dir::Down => "down",
        }
    }
}

#[derive(Debug, Clone)]
struct Item {
    name: &'static str,
    weight: u32,
    desc: &'static str,
    portable: bool,
}

#[derive(Debug, Clone)]
struct Room {
    id: usize,
    name: &'static str,
    desc: &'static str,
    exits: Vec<(Dir, usize)>,
    items: Vec<&'static str>,
    lit: bool,
    visited: bool,
}

impl Room {
    fn exit(&self, dir: Dir) -> Option<usize> {
        self.exits.iter().find(|(d, _)| *d == dir).map(|(_, to)| *to)
    }
}

fn item_catalog() -> HashMap<&'static str, Item> {
    let items = [
        Item {
            name: "leaflet",
            weight: 1,
            desc: "WELCOME TO THE MESH. Treasure lies beyond the locked door.",
            portable: true,
        },
        Item {
            name: "lamp",
            weight: 3,
            desc: "A brass lantern. Try USE LAMP.",
            portable: true,
        },
        Item {
            name: "key",
            weight: 1,
            desc: "A heavy iron key with a vault symbol.",
            portable: true,
        },
        Item {
            name: "workbench",
            weight: 50,
            desc: "Scarred oak, bolted to the floor.",
            portable: false,
        },
        Item {
            name: "scroll",
            weight: 1,
            desc: "Faded runes cover the parchment. Maybe USE it.",
            portable: true,
        },
        Item {
            name: "treasure",
            weight: 5,
            desc: "A chest of old radio crystals, glittering.",
            portable: true,
        },
    ];
    items.into_iter().map(|i| (i.name, i)).collect()
}

fn build_world() -> Vec<Room> {
    let room = |id, name, desc, exits: &[(Dir, usize)], items: &[&'static str], lit| Room {
        id,
        name,
        desc,
        exits: exits.to_vec(),
        items: items.to_vec(),
        lit,
        visited: false,
    };
    vec![
        room(
            1,
            "Trailhead",
            "A gravel lot at the edge of a pine forest. A path leads north.",
            &[(Dir::North, 2)],
            &["leaflet"],
            true,
        ),
        room(
            2,
            "Forest Clearing",
            "Sunlight falls through the pines. A shed stands to the east.",
            &[(Dir::South, 1), (Dir::East, 3), (Dir::North, 4)],
            &["lamp"],
            true,
        ),
        room(
            3,
            "Old Shed",
            "Dusty shelves and a workbench. Smells of oil.",
            &[(Dir::West, 2)],
            &["key", "workbench"],
            true,
        ),
        room(
            4,
            "Cave Mouth",
            "A cold draft rises from a passage leading down.",
            &[(Dir::South, 2), (Dir::Down, 5)],
            &[],
            true,
        ),
        room(
            5,
            "Dark Passage",
            "Dripping rock walls. An iron door is set into the east wall.",
            &[(Dir::Up, 4), (Dir::East, 6), (Dir::North, 7)],
            &[],
            false,
        ),
        room(
            6,
            "Vault",
            "A small stone vault, untouched for years.",
            &[(Dir::West, 5)],
            &["treasure", "scroll"],
            false,
        ),
        room(
            7,
            "Thief's Den",
            "A cramped nook strewn with stolen trinkets.",
            &[(Dir::South, 5)],
            &[],
            false,
        ),
    ]
}

/// Split player input into `(verb, noun, prep)` commands.
pub fn parse(input: &str) -> Vec<(String, String, String)> {
    let lowered = input.to_lowercase();
    lowered
        .trim()
        .split(" and ")
        .filter_map(|part| {
            let mut tokens = part.split_whitespace();
            let first = tokens.next()?;
            let verb = Dir::parse(first)
                .map(|d| d.name().to_string())
                .unwrap_or_else(|| first.to_string());
            let noun = tokens.next().unwrap_or("").to_string();
            let prep = tokens.next().unwrap_or("").to_string();
            Some((verb, noun, prep))
        })
        .collect()
}

pub struct Game {
    rooms: Vec<Room>,
    items: HashMap<&'static str, Item>,
    player_room: usize,
    inventory: Vec<&'static str>,
    door_locked: bool,
    lamp_lit: bool,
    scroll_read: bool,
    vault_found: bool,
    thief_has: Option<&'static str>,
    thief_chance: f64,
    verbose: bool,
    score: u32,
    moves: u32,
    rng: StdRng,
}

impl Game {
    pub fn new(thief_chance: f64, rng: StdRng) -> Self {
        Self {
            rooms: build_world(),
            items: item_catalog(),
            player_room: START_ROOM,
            inventory: Vec::new(),
            door_locked: true,
            lamp_lit: false,
            scroll_read: false,
            vault_found: false,
            thief_has: None,
            thief_chance,
            verbose: false,
            score: 0,
            moves: 0,
            rng,
        }
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn moves(&self) -> u32 {
        self.moves
    }

    fn room(&self) -> &Room {
        &self.rooms[self.player_room - 1]
    }

    fn room_mut(&mut self) -> &mut Room {
        &mut self.rooms[self.player_room - 1]
    }

    fn weight(&self) -> u32 {
        self.inventory.iter().map(|n| self.items[n].weight).sum()
    }

    fn is_dark(&self) -> bool {
        !self.room().lit && !self.lamp_lit
    }

    /// Parse and run `input`, returning everything the game printed.
    pub fn play(&mut self, input: &str) -> String {
        let mut out = Vec::new();
        for (verb, noun, prep) in parse(input) {
            self.run_command(&verb, &noun, &prep, &mut out);
        }
        out.join("\n")
    }

    fn run_command(&mut self, verb: &str, noun: &str, prep: &str, out: &mut Vec<String>) {
        self.moves += 1;
        if let Some(dir) = Dir::parse(verb) {
            self.do_move(dir, out);
            return;
        }
        match verb {
            "go" | "walk" => match Dir::parse(noun) {
                Some(dir) => self.do_move(dir, out),
                None => out.push("Go where?".to_string()),
            },
            "look" | "l" => self.do_look(out),
            "examine" | "x" | "read" => self.do_examine(noun, out),
            "take" | "get" => self.do_take(noun, out),
            "drop" => self.do_drop(noun, out),
            "inventory" | "i" => self.do_inventory(out),
            "use" => self.do_use(noun, prep, out),
            "score" => out.push(format!("Score: {}/{}", self.score, MAX_SCORE)),
            "moves" => out.push(format!("Moves: {}", self.moves)),
            "verbose" => {
                self.verbose = !self.verbose;
                out.push(if self.verbose { "Verbose" } else { "Brief" }.to_string());
            }
            _ => out.push(format!(
                "I don't know the word '{}'; try LOOK or EXAMINE",
                verb
            )),
        }
    }

    pub fn describe(&mut self) -> String {
        let mut out = Vec::new();
        self.do_look(&mut out);
        out.join("\n")
    }

    fn do_look(&mut self, out: &mut Vec<String>) {
        if self.is_dark() {
            out.push("It is pitch dark.".to_string());
            return;
        }
        let verbose = self.verbose;
        let room = self.room_mut();
        out.push(format!("Room {}: {}", room.id, room.name));
        if verbose || !room.visited {
            out.push(room.desc.to_string());
            room.visited = true;
        }
        let exits: Vec<&str> = room.exits.iter().map(|(d, _)| d.name()).collect();
        out.push(format!("Exits: {}", exits.join(", ")));
        if !room.items.is_empty() {
            out.push(format!("You see: {}", room.items.join(", ")));
        }
    }

    fn do_move(&mut self, dir: Dir, out: &mut Vec<String>) {
        let Some(next) = self.room().exit(dir) else {
            out.push("You can't go that way.".to_string());
            return;
        };
        if self.player_room == LOCKED_ROOM && dir == LOCKED_EXIT && self.door_locked {
            out.push("The way is locked.".to_string());
            return;
        }
        self.player_room = next;

        if self.thief_has.is_none()
            && !self.inventory.is_empty()
            && self.rng.gen_bool(self.thief_chance.clamp(0.0, 1.0))
        {
            let idx = self.rng.gen_range(0..self.inventory.len());
            let stolen = self.inventory.remove(idx);
            if stolen == "lamp" {
                self.lamp_lit = false;
            }
            self.rooms[THIEF_ROOM - 1].items.push(stolen);
            self.thief_has = Some(stolen);
            out.push(format!("A thief snatches your {} and runs away!", stolen));
        }

        if self.player_room == THIEF_ROOM {
            if let Some(stolen) = self.thief_has.take() {
                self.room_mut().items.retain(|n| *n != stolen);
                self.inventory.push(stolen);
                out.push(format!("You reclaim your {} from the thief.", stolen));
            }
        }

        if self.player_room == VAULT_ROOM && !self.vault_found {
            self.vault_found = true;
            self.score += 5;
        }

        self.do_look(out);
    }

    fn do_examine(&self, noun: &str, out: &mut Vec<String>) {
        let visible = self.carrying(noun) || self.room().items.iter().any(|n| *n == noun);
        match self.items.get(noun) {
            Some(item) if visible => out.push(item.desc.to_string()),
            _ => out.push("You see nothing special about it.".to_string()),
        }
    }

    fn do_take(&mut self, noun: &str, out: &mut Vec<String>) {
        if self.is_dark() {
            out.push("It is too dark to find anything.".to_string());
            return;
        }
        let Some(item) = self.items.get(noun).cloned() else {
            out.push("There is no such item here.".to_string());
            return;
        };
        if !self.room().items.contains(&item.name) {
            out.push("There is no such item here.".to_string());
            return;
        }
        if !item.portable {
            out.push("You cannot carry that.".to_string());
            return;
        }
        if self.weight() + item.weight > MAX_WEIGHT {
            out.push("Your load is too heavy.".to_string());
            return;
        }
        self.room_mut().items.retain(|n| *n != item.name);
        self.inventory.push(item.name);
        if item.name == "treasure" {
            self.score += 10;
        }
        out.push("Taken.".to_string());
    }

    fn do_drop(&mut self, noun: &str, out: &mut Vec<String>) {
        let Some(pos) = self.inventory.iter().position(|n| *n == noun) else {
            out.push("You don't have that.".to_string());
            return;
        };
        let item = self.inventory.remove(pos);
        if item == "lamp" {
            self.lamp_lit = false;
        }
        self.room_mut().items.push(item);
        out.push("Dropped.".to_string());
    }

    fn do_inventory(&self, out: &mut Vec<String>) {
        if self.inventory.is_empty() {
            out.push("You are empty-handed.".to_string());
            return;
        }
        out.push("You are carrying:".to_string());
        for name in &self.inventory {
            out.push(format!("- {} ({})", name, self.items[name].weight));
        }
        out.push(format!("Total weight: {}/{}", self.weight(), MAX_WEIGHT));
    }

    fn carrying(&self, name: &str) -> bool {
        self.inventory.iter().any(|n| *n == name)
    }

    fn do_use(&mut self, item: &str, on: &str, out: &mut Vec<String>) {
        if !self.carrying(item) {
            out.push("You don't have that.".to_string());
            return;
        }
        match (item, on) {
            ("lamp", _) => {
                self.lamp_lit = true;
                out.push("The lamp is now lit.".to_string());
            }
            ("key", "door" | "") if self.player_room == LOCKED_ROOM => {
                if !self.door_locked {
                    out.push("The door is already unlocked.".to_string());
                } else {
                    self.door_locked = false;
                    self.score += 5;
                    out.push("The door unlocks.".to_string());
                }
            }
            ("scroll", _) if !self.scroll_read => {
                self.scroll_read = true;
                self.score += 5;
                out.push("The scroll reveals a secret: score +5!".to_string());
            }
            _ => out.push("Nothing happens.".to_string()),
        }
    }
}

/// `zork` command handler: one [`Game`] per user.
pub struct Adventure {
    games: Mutex<HashMap<u32, Game>>,
    thief_chance: f64,
    rng: std::sync::Mutex<StdRng>,
}

impl Adventure {
    pub fn new() -> Self {
        Self::with_rng(0.1, StdRng::from_entropy())
    }

    pub fn with_rng(thief_chance: f64, rng: StdRng) -> Self {
        Self {
            games: Mutex::new(HashMap::new()),
            thief_chance,
            rng: std::sync::Mutex::new(rng),
        }
    }

    fn fresh_rng(&self) -> StdRng {
        match self.rng.lock() {
            Ok(mut rng) => StdRng::seed_from_u64(rng.gen()),
            Err(_) => StdRng::from_entropy(),
        }
    }

    pub async fn execute(&self, user: u32, command: &str) -> String {
        let command = command.trim();
        let mut games = self.games.lock().await;
        match command.to_lowercase().as_str() {
            "" | "help" => USAGE.to_string(),
            "start" => {
                let mut game = Game::new(self.thief_chance, self.fresh_rng());
                let intro = game.describe();
                games.insert(user, game);
                intro
            }
            "quit" | "exit" => match games.remove(&user) {
                Some(_) => "Game over.".to_string(),
                None => "No active game.".to_string(),
            },
            _ => match games.get_mut(&user) {
                None => "No active game. Type 'zork start' to begin.".to_string(),
                Some(game) => {
                    let out = game.play(command);
                    if out.trim().is_empty() {
                        "...".to_string()
                    } else {
                        out.trim().to_string()
                    }
                }
            },
        }
    }

    pub async fn active_games(&self) -> usize {
        self.games.lock().await.len()
    }
}

impl Default for Adventure {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandHandler for Adventure {
    fn keyword(&self) -> &'static str {
        "zork"
    }

    fn refreshes_warmth(&self) -> bool {
        false
    }

    async fn handle(&self, args: &str, _target: Target, user: u32) -> String {
        self.execute(user, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn honest_game() -> Game {
        Game::new(0.0, StdRng::seed_from_u64(1))
    }

    #[test]
    fn parser_expands_directions_and_chains() {
        let cmds = parse("N and take Lamp and use key door");
        assert_eq!(
            cmds,
            vec![
                ("north".into(), "".into(), "".into()),
                ("take".into(), "lamp".into(), "".into()),
                ("use".into(), "key".into(), "door".into()),
            ]
        );
        assert!(parse("   ").is_empty());
    }

    #[test]
    fn full_walkthrough_scores_everything() {
        let mut g = honest_game();
        assert!(g.describe().starts_with("Room 1: Trailhead"));
        g.play("n and take lamp and e and take key and w and n and d");
        assert_eq!(g.play("look"), "It is pitch dark.");
        g.play("use lamp");
        assert_eq!(g.play("e"), "The way is locked.");
        assert_eq!(g.play("use key door"), "The door unlocks.");
        let vault = g.play("e");
        assert!(vault.contains("Room 6: Vault"), "{}", vault);
        assert_eq!(
            g.play("take treasure and use scroll"),
            "Taken.\nYou don't have that."
        );
        g.play("take scroll and use scroll");
        assert_eq!(g.play("score"), format!("Score: {}/{}", MAX_SCORE, MAX_SCORE));
    }

    #[test]
    fn weight_limit_and_fixed_items() {
        let mut g = honest_game();
        g.play("n and take lamp and e");
        assert_eq!(g.play("take workbench"), "You cannot carry that.");
        assert_eq!(g.play("take key"), "Taken.");
        assert!(g.play("i").ends_with("Total weight: 4/10"));
        assert_eq!(g.play("drop sword"), "You don't have that.");
        assert_eq!(g.play("drop key"), "Dropped.");
    }

    #[test]
    fn unknown_words_and_walls() {
        let mut g = honest_game();
        assert_eq!(
            g.play("xyzzy"),
            "I don't know the word 'xyzzy'; try LOOK or EXAMINE"
        );
        assert_eq!(g.play("west"), "You can't go that way.");
        assert_eq!(g.moves(), 2);
    }

    #[test]
    fn thief_steals_and_item_is_reclaimed_in_den() {
        let mut g = Game::new(1.0, StdRng::seed_from_u64(7));
        g.play("n and take lamp and use lamp");
        let out = g.play("n");
        assert!(out.contains("A thief snatches your lamp"), "{}", out);
        assert!(g.inventory.is_empty());
        g.play("d and n");
        assert_eq!(g.inventory, vec!["lamp"]);
    }

    #[tokio::test]
    async fn handler_lifecycle_is_per_user() {
        let adv = Adventure::with_rng(0.0, StdRng::seed_from_u64(3));
        assert_eq!(adv.execute(1, "").await, USAGE);
        assert_eq!(adv.execute(1, "look").await, "No active game. Type 'zork start' to begin.");
        assert!(adv.execute(1, "start").await.starts_with("Room 1: Trailhead"));
        assert_eq!(adv.execute(2, "quit").await, "No active game.");
        assert!(adv.execute(1, "n").await.contains("Forest Clearing"));
        assert_eq!(adv.active_games().await, 1);
        assert_eq!(adv.execute(1, "exit").await, "Game over.");
        assert_eq!(adv.active_games().await, 0);
    }
}
