use csk_core::envelope::Envelope;

/// JSON mode prints the envelope itself; text mode renders the three
/// labelled blocks.
pub fn print_envelope(envelope: &Envelope, json: bool) {
    if json {
        match serde_json::to_string_pretty(envelope) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("error: failed to encode envelope: {e}"),
        }
    } else {
        print!("{}", envelope.render_text());
    }
}
