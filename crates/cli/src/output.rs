#![forbid(unsafe_code)]

//! Envelope rendering.
//!
//! `--json` prints the envelope as one JSON object on stdout and nothing
//! else. The human rendering shows the payload, then warnings and next-step
//! hints. Decorations respect `NO_COLOR`.

use ls_engine::envelope::Envelope;
use std::io::IsTerminal;

pub fn render(envelope: &Envelope, json: bool) {
    if json {
        println!("{}", envelope.to_value());
        return;
    }

    let decorate = std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal();

    if envelope.ok {
        match serde_json::to_string_pretty(&envelope.data) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{}", envelope.data),
        }
    } else if let Some(error) = &envelope.error {
        if decorate {
            eprintln!("\x1b[31merror\x1b[0m [{}]: {}", error.code, error.message);
        } else {
            eprintln!("error [{}]: {}", error.code, error.message);
        }
        if let Some(details) = &error.details {
            eprintln!("  {details}");
        }
    }

    for warning in &envelope.warnings {
        if decorate {
            eprintln!("\x1b[33mwarning\x1b[0m: {warning}");
        } else {
            eprintln!("warning: {warning}");
        }
    }
    for action in &envelope.next {
        if decorate {
            eprintln!("\x1b[2mnext\x1b[0m: {}  ({})", action.cmd, action.intent);
        } else {
            eprintln!("next: {}  ({})", action.cmd, action.intent);
        }
    }
}
