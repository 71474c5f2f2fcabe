//! Search input debouncing.

use std::time::Duration;

use compact_str::CompactString;
use docshelf_core::normalize_search;
use tokio::sync::mpsc;
use tracing::debug;

/// Channel buffer size for raw search input.
pub const SEARCH_CHANNEL_SIZE: usize = 32;

/// Start a task that coalesces raw search input.
///
/// Every string sent on the returned sender restarts the quiet window. Once
/// no input arrives for `window`, the latest input is normalized and emitted
/// on the returned receiver, unless it equals the previously emitted term.
/// `None` means the search was cleared.
///
/// The task ends when the sender is dropped, after flushing pending input.
pub fn spawn_search_debouncer(
    window: Duration,
) -> (mpsc::Sender<String>, mpsc::Receiver<Option<CompactString>>) {
    let (input_tx, mut input_rx) = mpsc::channel::<String>(SEARCH_CHANNEL_SIZE);
    let (output_tx, output_rx) = mpsc::channel(SEARCH_CHANNEL_SIZE);

    tokio::spawn(async move {
        let mut emitted: Option<CompactString> = None;

        while let Some(mut latest) = input_rx.recv().await {
            loop {
                match tokio::time::timeout(window, input_rx.recv()).await {
                    Ok(Some(next)) => latest = next,
                    // Sender gone or quiet window elapsed
                    Ok(None) | Err(_) => break,
                }
            }

            let term = normalize_search(&latest);
            if term == emitted {
                debug!(?term, "Search term unchanged");
                continue;
            }
            emitted = term.clone();
            if output_tx.send(term).await.is_err() {
                break;
            }
        }
    });

    (input_tx, output_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(750);

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_coalesce() {
        let (tx, mut rx) = spawn_search_debouncer(WINDOW);
        for input in ["b", "bu", "bud", " Budget "] {
            tx.send(input.to_string()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(rx.recv().await, Some(Some("budget".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_term_is_not_emitted() {
        let (tx, mut rx) = spawn_search_debouncer(WINDOW);

        tx.send("report".to_string()).await.unwrap();
        assert_eq!(rx.recv().await, Some(Some("report".into())));

        tx.send("  REPORT".to_string()).await.unwrap();
        tokio::time::sleep(WINDOW * 2).await;
        tx.send("   ".to_string()).await.unwrap();

        // The normalized duplicate was swallowed; the clear comes through.
        assert_eq!(rx.recv().await, Some(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_sender_flushes_and_ends() {
        let (tx, mut rx) = spawn_search_debouncer(WINDOW);
        tx.send("draft".to_string()).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await, Some(Some("draft".into())));
        assert_eq!(rx.recv().await, None);
    }
}
