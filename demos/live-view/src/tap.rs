//! Line-driven tap simulator.
//!
//! Enter a preset number to select a card, an empty line to tap it, any
//! other text to tap that uid, or `q` to quit.

use fleet_live_core::LiveViewConfig;
use fleet_live_tap::{CARD_PRESETS, TapSimulator, TapView, TerminalBell};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;

pub async fn run(config: &LiveViewConfig) -> anyhow::Result<()> {
    let mut simulator = TapSimulator::connect_mqtt(config, TerminalBell);
    let mut updates = simulator.updates();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut card = CARD_PRESETS[0].uid.to_string();

    for (n, preset) in CARD_PRESETS.iter().enumerate() {
        println!("  {}) {} ({})", n + 1, preset.label, preset.uid);
    }
    println!("Selected {card}. Enter taps, a number selects, q quits.");

    let mut last: Option<TapView> = None;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line == "q" {
                    break;
                }
                if let Some(preset) = line
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| CARD_PRESETS.get(i))
                {
                    card = preset.uid.to_string();
                    println!("Selected {} ({card})", preset.label);
                } else if line.is_empty() {
                    simulator.publish(card.clone());
                } else {
                    simulator.publish(line);
                }
            }
            Some(view) = updates.next() => {
                print_changes(last.as_ref(), &view, &card);
                last = Some(view);
            }
        }
    }

    simulator.shutdown().await;
    Ok(())
}

fn print_changes(last: Option<&TapView>, view: &TapView, card: &str) {
    if last.is_none_or(|l| l.connection != view.connection) {
        println!("[{}]", view.connection.label());
    }
    if last.is_some_and(|l| l.state == view.state && l.history == view.history) {
        return;
    }

    println!("{}: {}", view.title(), view.subtitle());
    if view.current.is_some() {
        let fare = view.fare_details(card);
        println!(
            "  {} {} -> {} ({} km)  fare {}  balance {}  trip {}  reason {}  latency {}",
            fare.uid,
            fare.origin,
            fare.destination,
            fare.distance_km,
            fare.fare,
            fare.remaining_balance,
            fare.trip_state,
            fare.reason,
            fare.latency,
        );
    }
    if let Some(entry) = view.history.first().filter(|_| view.current.is_some()) {
        tracing::debug!(
            uid = entry.uid.as_deref().unwrap_or_default(),
            decision = %entry.decision,
            history = view.history.len(),
            "Recorded tap"
        );
    }
}
