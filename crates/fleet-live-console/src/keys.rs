//! Key events to the raw input a terminal emulator would send.
//!
//! Lets non-browser front ends feed [`ConsoleBridge`](crate::ConsoleBridge)
//! the same bytes a web terminal produces for each key.

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// Raw input for a terminal event, if it produces any.
///
/// Key releases, focus and mouse events yield nothing. Pasted text is sent
/// as-is.
#[must_use]
pub fn event_to_input(event: &Event) -> Option<Vec<u8>> {
    match event {
        Event::Key(key) if key.kind != KeyEventKind::Release => key_to_input(key),
        Event::Paste(text) => Some(text.as_bytes().to_vec()),
        _ => None,
    }
}

/// Raw input bytes for a key press.
#[must_use]
pub fn key_to_input(key: &KeyEvent) -> Option<Vec<u8>> {
    let mut bytes = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            vec![control_byte(c)?]
        }
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Esc => vec![0x1b],
        KeyCode::F(n) => function_key(n)?.to_vec(),
        code => cursor_key(code)?.to_vec(),
    };

    // Meta sends an ESC prefix.
    if key.modifiers.contains(KeyModifiers::ALT) {
        bytes.insert(0, 0x1b);
    }
    Some(bytes)
}

/// C0 control byte for Ctrl+`c`.
fn control_byte(c: char) -> Option<u8> {
    match c.to_ascii_lowercase() {
        c @ 'a'..='z' => Some(c as u8 - b'a' + 1),
        '@' | ' ' | '2' => Some(0x00),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '7' | '/' => Some(0x1f),
        '8' | '?' => Some(0x7f),
        _ => None,
    }
}

fn cursor_key(code: KeyCode) -> Option<&'static [u8]> {
    let seq: &'static [u8] = match code {
        KeyCode::Up => b"\x1b[A",
        KeyCode::Down => b"\x1b[B",
        KeyCode::Right => b"\x1b[C",
        KeyCode::Left => b"\x1b[D",
        KeyCode::Home => b"\x1b[H",
        KeyCode::End => b"\x1b[F",
        KeyCode::PageUp => b"\x1b[5~",
        KeyCode::PageDown => b"\x1b[6~",
        KeyCode::Delete => b"\x1b[3~",
        KeyCode::Insert => b"\x1b[2~",
        _ => return None,
    };
    Some(seq)
}

fn function_key(n: u8) -> Option<&'static [u8]> {
    const KEYS: [&[u8]; 12] = [
        b"\x1bOP", b"\x1bOQ", b"\x1bOR", b"\x1bOS", b"\x1b[15~", b"\x1b[17~", b"\x1b[18~",
        b"\x1b[19~", b"\x1b[20~", b"\x1b[21~", b"\x1b[23~", b"\x1b[24~",
    ];
    KEYS.get(usize::from(n).checked_sub(1)?).copied()
}
