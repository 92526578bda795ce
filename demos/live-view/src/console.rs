//! Raw-mode terminal attached to a remote console.

use std::{
    io::{self, Write},
    time::Duration,
};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{self, disable_raw_mode, enable_raw_mode},
};
use fleet_live_console::{ConsoleBridge, OutputChunk, TerminalSink, keys};
use fleet_live_core::LiveViewConfig;
use tokio::sync::mpsc;

/// Writes remote output straight to stdout; the local terminal does the
/// rendering.
struct StdoutSink {
    stdout: io::Stdout,
}

impl TerminalSink for StdoutSink {
    fn write(&mut self, chunk: &OutputChunk) {
        let mut out = self.stdout.lock();
        if let Err(e) = out.write_all(chunk.as_str().as_bytes()).and_then(|()| out.flush()) {
            tracing::warn!("Failed to write console output: {e}");
        }
    }

    fn fit(&mut self) {
        if let Ok((cols, rows)) = terminal::size() {
            tracing::debug!(cols, rows, "Terminal resized");
        }
    }
}

pub async fn run(config: &LiveViewConfig) -> anyhow::Result<()> {
    let mut bridge = ConsoleBridge::connect_ws(
        &config.console,
        StdoutSink {
            stdout: io::stdout(),
        },
    )?;

    enable_raw_mode()?;
    let result = attach(&bridge).await;
    disable_raw_mode()?;

    bridge.close().await;
    result
}

async fn attach(bridge: &ConsoleBridge) -> anyhow::Result<()> {
    let mut events = spawn_event_reader();
    let mut status = bridge.watch_state();
    tracing::info!(status = bridge.status_label(), "Console");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Ok(event)) if is_detach(&event) => return Ok(()),
                Some(Ok(Event::Resize(..))) => bridge.resize(),
                Some(Ok(event)) => {
                    if let Some(bytes) = keys::event_to_input(&event) {
                        bridge.send_input(&bytes);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            },
            changed = status.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = *status.borrow_and_update();
                tracing::info!(status = state.label(), "Console");
            }
        }
    }
}

fn is_detach(event: &Event) -> bool {
    matches!(
        event,
        Event::Key(KeyEvent {
            code: KeyCode::Char(']'),
            modifiers,
            kind: KeyEventKind::Press,
            ..
        }) if modifiers.contains(KeyModifiers::CONTROL)
    )
}

/// crossterm's reader blocks, so it gets its own thread. The thread exits
/// once the receiver is dropped.
fn spawn_event_reader() -> mpsc::UnboundedReceiver<io::Result<Event>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        while !tx.is_closed() {
            match event::poll(Duration::from_millis(100)) {
                Ok(false) => {}
                Ok(true) => {
                    if tx.send(event::read()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
    rx
}
