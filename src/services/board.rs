//! Per-target bulletin board.
//!
//! Every peer and every channel has its own list of posts, kept in memory and persisted
//! as a JSON array at `<data_dir>/<kind>-<id>.json`. Boards are loaded lazily on first
//! use; a missing or unreadable file is an empty board.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fs2::FileExt;
use log::{debug, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::CommandHandler;
use crate::logutil::safe_text;
use crate::meshtastic::Target;

pub const MAX_POST_CHARS: usize = 1024;

pub struct BulletinBoard {
    data_dir: PathBuf,
    boards: Mutex<HashMap<Target, Vec<String>>>,
}

impl BulletinBoard {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            boards: Mutex::new(HashMap::new()),
        }
    }

    pub fn board_path(&self, target: Target) -> PathBuf {
        self.data_dir
            .join(format!("{}-{}.json", target.kind(), target.id()))
    }

    async fn load_board(&self, target: Target) -> Vec<String> {
        let path = self.board_path(target);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => match serde_json::from_str::<Vec<String>>(&data) {
                Ok(posts) => posts,
                Err(e) => {
                    warn!("Ignoring unreadable board {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Failed reading board {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    async fn save_board(&self, target: Target, posts: &[String]) -> Result<()> {
        let content = serde_json::to_string(posts)
            .map_err(|e| anyhow!("Failed to serialize board: {}", e))?;
        let dir = self.data_dir.clone();
        let path = self.board_path(target);
        tokio::task::spawn_blocking(move || {
            ensure_private_dir(&dir)?;
            write_file_locked(&path, &content)
        })
        .await
        .map_err(|e| anyhow!("Board write task failed: {}", e))?
    }

    /// Run one `bbs` command against the board of `target`.
    pub async fn execute(&self, target: Target, user: u32, command: &str) -> String {
        let command = command.trim();
        let mut boards = self.boards.lock().await;
        if !boards.contains_key(&target) {
            let loaded = self.load_board(target).await;
            boards.insert(target, loaded);
        }
        let board = boards.entry(target).or_default();

        let (head, rest) = match command.split_once(char::is_whitespace) {
            Some((h, r)) => (h, r.trim()),
            None => (command, ""),
        };

        match head {
            "" | "list" if rest.is_empty() => list_posts(board),
            "read" => match rest.parse::<usize>() {
                Ok(n) if n >= 1 && n <= board.len() => board[n - 1].clone(),
                Ok(_) => "No such post.".to_string(),
                Err(_) => "Usage: bbs read <n>".to_string(),
            },
            _ => {
                let content = if head == "post" { rest } else { command };
                let entry = format!("{}: {}", user, safe_text(content, MAX_POST_CHARS));
                board.push(entry);
                let count = board.len();
                if let Err(e) = self.save_board(target, board).await {
                    warn!("Failed to persist board for {}: {}", target, e);
                }
                debug!("Board {} now has {} posts", target, count);
                format!("Post #{} recorded.", count)
            }
        }
    }
}

fn list_posts(board: &[String]) -> String {
    if board.is_empty() {
        return "No posts.".to_string();
    }
    let lines: Vec<String> = board
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}. {}", i + 1, p))
        .collect();
    format!("Posts:\n{}", lines.join("\n"))
}

#[async_trait]
impl CommandHandler for BulletinBoard {
    fn keyword(&self) -> &'static str {
        "bbs"
    }

    async fn handle(&self, args: &str, target: Target, user: u32) -> String {
        self.execute(target, user, args).await
    }
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(dir)
        .map_err(|e| anyhow!("Failed to create {}: {}", dir.display(), e))
}

/// Replace `path` with `content` via a locked temp-file + rename.
fn write_file_locked(path: &Path, content: &str) -> Result<()> {
    use std::fs::{self, File, OpenOptions};
    use std::io::Write;

    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    lock_file.lock_exclusive()?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("board.json");
    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        match options.open(&candidate) {
            Ok(mut tmp) => {
                tmp.write_all(content.as_bytes())?;
                tmp.flush()?;
                let _ = tmp.sync_all();
                break candidate;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
            }
            Err(e) => return Err(anyhow!("Failed to create temp file for atomic write: {}", e)),
        }
    };

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(anyhow!("Failed to replace {}: {}", path.display(), e));
    }
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    drop(lock_file);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_read_and_post() {
        let dir = tempfile::tempdir().unwrap();
        let bbs = BulletinBoard::new(dir.path());
        let t = Target::Channel(0);
        assert_eq!(bbs.execute(t, 7, "").await, "No posts.");
        assert_eq!(bbs.execute(t, 7, "post hello mesh").await, "Post #1 recorded.");
        assert_eq!(bbs.execute(t, 9, "second one").await, "Post #2 recorded.");
        assert_eq!(
            bbs.execute(t, 7, "list").await,
            "Posts:\n1. 7: hello mesh\n2. 9: second one"
        );
        assert_eq!(bbs.execute(t, 7, "read 2").await, "9: second one");
        assert_eq!(bbs.execute(t, 7, "read 3").await, "No such post.");
        assert_eq!(bbs.execute(t, 7, "read 0").await, "No such post.");
        assert_eq!(bbs.execute(t, 7, "read x").await, "Usage: bbs read <n>");
        assert_eq!(bbs.execute(t, 7, "read").await, "Usage: bbs read <n>");
    }

    #[tokio::test]
    async fn boards_are_per_target_and_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let bbs = BulletinBoard::new(dir.path());
            bbs.execute(Target::Node(5), 5, "post line1\nline2").await;
            bbs.execute(Target::Channel(5), 5, "post other").await;
        }
        let path = dir.path().join("peer-5.json");
        assert!(path.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let bbs = BulletinBoard::new(dir.path());
        assert_eq!(
            bbs.execute(Target::Node(5), 5, "list").await,
            "Posts:\n1. 5: line1\\nline2"
        );
        assert_eq!(
            bbs.execute(Target::Channel(5), 5, "read 1").await,
            "5: other"
        );
    }

    #[tokio::test]
    async fn corrupt_file_is_an_empty_board() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("channel-1.json"), "not json").unwrap();
        let bbs = BulletinBoard::new(dir.path());
        assert_eq!(bbs.execute(Target::Channel(1), 1, "list").await, "No posts.");
    }
}
