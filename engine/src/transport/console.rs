//! Console transport
//!
//! Line-oriented REPL over any async reader/writer pair. Each line is one
//! inbound message for a fixed user. Options are printed with the payload to
//! type when it differs from the label.

use anyhow::{Context, Result};
use sdk::errors::TasksbotErrorExt;
use sdk::types::{InboundMessage, RenderInstruction, UserId};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::conversation::ConversationEngine;

/// Render an instruction as plain text.
pub fn format_render(render: &RenderInstruction) -> String {
    let mut out = render.text.clone();
    for option in &render.options {
        out.push('\n');
        if option.payload == option.label {
            out.push_str(&format!("  • {}", option.label));
        } else {
            out.push_str(&format!("  [{}] {}", option.payload, option.label));
        }
    }
    out
}

/// Feed lines from `input` to the engine until EOF or `/quit`.
pub async fn run_console<R, W>(
    engine: &ConversationEngine,
    user_id: UserId,
    input: R,
    mut output: W,
    json: bool,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let render = match engine.handle_message(InboundMessage::new(user_id, line)).await {
            Ok(render) => render,
            Err(e) => {
                warn!("Message failed: {}", e);
                RenderInstruction::reprompt(e.user_hint())
            }
        };

        let text = if json {
            serde_json::to_string(&render).context("Failed to encode reply")?
        } else {
            format!("{}\n", format_render(&render))
        };
        output
            .write_all(format!("{}\n", text).as_bytes())
            .await
            .context("Failed to write reply")?;
        output.flush().await.context("Failed to flush output")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::conversation::{EngineOptions, Stores};
    use crate::db::Database;
    use crate::direction::{builtin_directions, DirectionRegistry};
    use crate::state::TaskRepository;
    use sdk::types::{MenuOption, Outcome};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_format_render_lists_payloads() {
        let render = RenderInstruction::prompt("Choose a direction:").with_options(vec![
            MenuOption::new("Кофейня", "coffee"),
            MenuOption::new("Срочный", "Срочный"),
        ]);
        let text = format_render(&render);
        assert!(text.contains("[coffee] Кофейня"));
        assert!(text.contains("• Срочный"));
    }

    #[tokio::test]
    async fn test_console_session_commits_checkin() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("console.db")).await.unwrap();
        let registry =
            DirectionRegistry::from_directions(builtin_directions().unwrap()).unwrap();
        let engine = ConversationEngine::new(
            Arc::new(registry),
            Stores::sqlite(&db),
            Arc::new(SystemClock),
            EngineOptions::default(),
        )
        .unwrap();

        let input: &[u8] = b"/start coffee\n1\nStore-3\n12\n/quit\nignored\n";
        let mut output = Vec::new();
        run_console(&engine, 5, input, &mut output, true).await.unwrap();

        let replies: Vec<RenderInstruction> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 4);
        assert!(matches!(replies[3].outcome, Outcome::Completed { .. }));

        let tasks = engine.tasks().list_by_author(5, None, 10).await.unwrap();
        assert_eq!(tasks.len(), 1);
    }
}
