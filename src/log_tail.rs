//! Log tailing: processors redirect stdout/stderr straight to files under
//! `.tuttle/processes/logs/` so output survives crashes and reruns. While a
//! process is in flight this module polls those files and echoes new lines
//! to the console with a colour-coded `[id:stream]` label, following a
//! growing file instead of a child's stdio pipe directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use console::{style, Color};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::task::JoinHandle;

static TASK_COLORS: &[Color] = &[Color::Cyan, Color::Green, Color::Yellow, Color::Magenta, Color::Blue, Color::Red];

const POLL_INTERVAL: Duration = Duration::from_millis(200);

lazy_static::lazy_static! {
    static ref OUTPUT_LOCK: Arc<tokio::sync::Mutex<()>> = Arc::new(tokio::sync::Mutex::new(()));
}

struct TailHandle {
    join: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// Tracks one background tail task per `(process, stream)` pair so the
/// scheduler can stop following a process as soon as it completes.
#[derive(Default)]
pub struct LogTailer {
    color_counter: AtomicUsize,
    tasks: StdMutex<HashMap<String, Vec<TailHandle>>>,
}

impl LogTailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts following `stdout_path`/`stderr_path` for `process_id`.
    pub fn follow(&self, process_id: &str, stdout_path: &Path, stderr_path: &Path) {
        let color = TASK_COLORS[self.color_counter.fetch_add(1, Ordering::Relaxed) % TASK_COLORS.len()];
        let handles = vec![
            spawn_tail(process_id.to_string(), stdout_path.to_path_buf(), "stdout", color, false),
            spawn_tail(process_id.to_string(), stderr_path.to_path_buf(), "stderr", color, true),
        ];
        self.tasks.lock().expect("log tailer lock poisoned").insert(process_id.to_string(), handles);
    }

    /// Signals the tailer for `process_id` to read whatever is left and
    /// stop, waiting for it so a finished process's last lines aren't lost.
    pub async fn finish(&self, process_id: &str) {
        let handles = self
            .tasks
            .lock()
            .expect("log tailer lock poisoned")
            .remove(process_id);
        if let Some(handles) = handles {
            for handle in handles {
                handle.stop.store(true, Ordering::Relaxed);
                let _ = handle.join.await;
            }
        }
    }

    /// Aborts every still-running tailer, for use during final cleanup.
    pub fn stop_all(&self) {
        let mut tasks = self.tasks.lock().expect("log tailer lock poisoned");
        for (_, handles) in tasks.drain() {
            for handle in handles {
                handle.stop.store(true, Ordering::Relaxed);
                handle.join.abort();
            }
        }
    }
}

fn spawn_tail(id: String, path: PathBuf, stream: &'static str, color: Color, is_stderr: bool) -> TailHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_task = Arc::clone(&stop);
    let join = tokio::spawn(async move {
        tail_loop(&id, &path, stream, color, is_stderr, &stop_for_task).await;
    });
    TailHandle { join, stop }
}

async fn tail_loop(id: &str, path: &Path, stream: &str, color: Color, is_stderr: bool, stop: &AtomicBool) {
    let mut offset: u64 = 0;
    loop {
        let (lines, new_offset) = read_new_lines(path, offset).await;
        offset = new_offset;
        for line in lines {
            print_line(id, stream, color, &line, is_stderr).await;
        }
        if stop.load(Ordering::Relaxed) {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Reads whatever whole lines have been appended to `path` since `offset`,
/// returning them along with the new offset. A file that doesn't exist yet
/// (the process hasn't created its log file) yields no lines.
async fn read_new_lines(path: &Path, offset: u64) -> (Vec<String>, u64) {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(_) => return (Vec::new(), offset),
    };
    if file.seek(std::io::SeekFrom::Start(offset)).await.is_err() {
        return (Vec::new(), offset);
    }
    let mut reader = BufReader::new(file);
    let mut lines = Vec::new();
    let mut position = offset;
    loop {
        let mut buf = String::new();
        match reader.read_line(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                position += n as u64;
                if buf.ends_with('\n') {
                    lines.push(buf.trim_end_matches(['\n', '\r']).to_string());
                } else {
                    // partial line at EOF; don't advance past it, retry next poll
                    position -= n as u64;
                    break;
                }
            }
            Err(_) => break,
        }
    }
    (lines, position)
}

async fn print_line(id: &str, stream: &str, color: Color, line: &str, is_stderr: bool) {
    let label = format!("[{id}:{stream}]");
    let formatted = format!("{} {}", style(label).fg(color).bold(), line);
    let _lock = OUTPUT_LOCK.lock().await;
    if is_stderr {
        eprintln!("{formatted}");
    } else {
        println!("{formatted}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_new_lines_skips_already_seen_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        tokio::fs::write(&path, "one\ntwo\n").await.unwrap();
        let (lines, offset) = read_new_lines(&path, 0).await;
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);

        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        tokio::fs::write(&path, "one\ntwo\nthree\n").await.unwrap();
        let (more, _) = read_new_lines(&path, offset).await;
        assert_eq!(more, vec!["three".to_string()]);
    }

    #[tokio::test]
    async fn read_new_lines_holds_back_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        tokio::fs::write(&path, "complete\nstill going").await.unwrap();
        let (lines, offset) = read_new_lines(&path, 0).await;
        assert_eq!(lines, vec!["complete".to_string()]);
        assert_eq!(offset, "complete\n".len() as u64);
    }

    #[tokio::test]
    async fn missing_file_yields_no_lines() {
        let (lines, offset) = read_new_lines(Path::new("/no/such/log"), 0).await;
        assert!(lines.is_empty());
        assert_eq!(offset, 0);
    }

    #[tokio::test]
    async fn follow_and_finish_do_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let stdout = dir.path().join("o");
        let stderr = dir.path().join("e");
        tokio::fs::write(&stdout, "hi\n").await.unwrap();
        tokio::fs::write(&stderr, "").await.unwrap();
        let tailer = LogTailer::new();
        tailer.follow("p1", &stdout, &stderr);
        tokio::time::sleep(Duration::from_millis(10)).await;
        tailer.finish("p1").await;
    }
}
