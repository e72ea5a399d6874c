use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use futures::StreamExt;
use tracing::debug;

use kubetap_exec::{
    ExecChannel, ExecError, ExecHandlers, ExecSession, KubeExecTransport, LogTarget, ShellCommand,
};

use crate::cli::ExecArgs;
use crate::commands::Cluster;
use crate::config::Config;

pub async fn run(args: ExecArgs, config: &Config) -> Result<()> {
    let cluster = Cluster::connect(&args.cluster).await?;

    let mut target = LogTarget::pod(cluster.namespace.as_str(), args.pod.as_str());
    if let Some(container) = &args.container {
        target = target.with_container(container.as_str());
    }

    let shells = if args.shells.is_empty() {
        config.shell_commands()
    } else {
        args.shells.iter().map(|s| ShellCommand::from(s.as_str())).collect()
    };

    let handlers = ExecHandlers {
        on_output: Arc::new(|_channel: ExecChannel, bytes: &[u8]| {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(bytes);
            let _ = out.flush();
        }),
        on_error: Some(Arc::new(|err: &ExecError| eprint!("\r\n{}\r\n", err))),
        on_close: Some(Arc::new(|| eprint!("\r\nconnection closed by remote\r\n"))),
    };

    let transport = KubeExecTransport::new(cluster.client);
    let session =
        ExecSession::open(&transport, target, &shells, handlers, config.exec_options()).await?;
    if let Some(shell) = session.shell() {
        eprintln!("connected to {} ({}), Ctrl-] to detach", session.target(), shell);
    }

    terminal::enable_raw_mode()?;
    let result = interact(&session).await;
    terminal::disable_raw_mode()?;

    session.disconnect();
    result
}

/// Forward keys and resizes until the session closes or the user detaches
async fn interact(session: &ExecSession) -> Result<()> {
    if let Ok((cols, rows)) = terminal::size() {
        session.resize(cols, rows);
    }

    let mut events = EventStream::new();
    loop {
        tokio::select! {
            _ = session.wait_closed() => break,

            event = events.next() => match event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    if is_detach(&key) {
                        debug!("detach requested");
                        break;
                    }
                    if let Some(bytes) = key_bytes(&key) {
                        session.send(&bytes);
                    }
                }
                Some(Ok(Event::Paste(text))) => session.send(&text),
                Some(Ok(Event::Resize(cols, rows))) => session.resize(cols, rows),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
                None => break,
            },
        }
    }

    Ok(())
}

fn is_detach(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char(']') | KeyCode::Char('5'))
}

/// Terminal input sequence for a key press
fn key_bytes(key: &KeyEvent) -> Option<String> {
    let text = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            let c = c.to_ascii_lowercase();
            if !c.is_ascii_lowercase() {
                return None;
            }
            ((c as u8 & 0x1f) as char).to_string()
        }
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "\r".to_string(),
        KeyCode::Tab => "\t".to_string(),
        KeyCode::BackTab => "\x1b[Z".to_string(),
        KeyCode::Backspace => "\x7f".to_string(),
        KeyCode::Esc => "\x1b".to_string(),
        KeyCode::Up => "\x1b[A".to_string(),
        KeyCode::Down => "\x1b[B".to_string(),
        KeyCode::Right => "\x1b[C".to_string(),
        KeyCode::Left => "\x1b[D".to_string(),
        KeyCode::Home => "\x1b[H".to_string(),
        KeyCode::End => "\x1b[F".to_string(),
        KeyCode::Delete => "\x1b[3~".to_string(),
        KeyCode::PageUp => "\x1b[5~".to_string(),
        KeyCode::PageDown => "\x1b[6~".to_string(),
        _ => return None,
    };

    if key.modifiers.contains(KeyModifiers::ALT) {
        Some(format!("\x1b{}", text))
    } else {
        Some(text)
    }
}
