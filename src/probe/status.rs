//! Status line classification for decoder, renderer and encoder output

use crate::utils::time::TimeParser;

/// Recognized content of one status line
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// `Duration: 00:00:26.00, start: ...` header field
    Duration(f64),
    /// `DURATION : 00:00:26.040000000` container tag
    DurationTag(f64),
    /// Frame rate from a `Video:` stream description
    Fps(f64),
    /// `NUMBER_OF_FRAMES: 651` container tag
    FrameCountTag(u64),
    /// `frame= 118 fps= 25 ...` encoder style counter
    EncodedFrame(u64),
    /// `FRAME_NO: 12` per displayed frame from the renderer
    DisplayedFrame(u64),
    /// Renderer announcing its MIDI emulation endpoint
    MidiEndpoint(String),
    /// Line not worth showing
    Noise,
    /// Anything else, already cleaned for display
    Text(String),
}

const MIDI_FALLBACK: &str = "Falling back to ZMQ midi";
const ENCODER_NOISE: [&str; 2] = [
    "slice end not reached but screenspace end",
    "corrupt decoded frame",
];

/// Parser for the textual status output of the pipeline tools
pub struct StatusParser;

impl StatusParser {
    /// Classify a decoder or standalone renderer line
    pub fn parse_metadata_line(line: &str) -> StatusEvent {
        if line.trim().is_empty() || line.contains("Duration: N/A") {
            return StatusEvent::Noise;
        }
        if let Some(rest) = after(line, "Duration:") {
            let value = rest.split(',').next().unwrap_or_default();
            return parse_clock(value).map_or(StatusEvent::Noise, StatusEvent::Duration);
        }
        if line.contains("Video:") && line.contains("fps") {
            if let Some(fps) = parse_fps(line) {
                return StatusEvent::Fps(fps);
            }
        }
        if let Some(rest) = after(line, "DURATION") {
            return rest
                .split_once(':')
                .and_then(|(_, value)| value.split_whitespace().next())
                .and_then(parse_clock)
                .map_or(StatusEvent::Noise, StatusEvent::DurationTag);
        }
        if let Some(rest) = after(line, "NUMBER_OF_FRAMES") {
            return rest
                .split_once(':')
                .and_then(|(_, value)| first_number(value))
                .map_or(StatusEvent::Noise, StatusEvent::FrameCountTag);
        }
        if let Some(frame) = Self::encoded_frame(line) {
            return StatusEvent::EncodedFrame(frame);
        }
        StatusEvent::Text(strip_hex_address(line))
    }

    /// Classify a line of the renderer's console
    pub fn parse_renderer_line(line: &str) -> StatusEvent {
        if line.is_empty() || line.contains("Duration: N/A") {
            return StatusEvent::Noise;
        }
        if let Some(rest) = after(line, "FRAME_NO:") {
            return first_number(rest).map_or(StatusEvent::Noise, StatusEvent::DisplayedFrame);
        }
        if line.contains("fd=") && line.contains("aq=") {
            return StatusEvent::Noise;
        }

        let cleaned = strip_hex_address(line);
        if let Some(end) = tagged_prefix_end(&cleaned) {
            let message = cleaned[end..].trim();
            if message.is_empty() {
                return StatusEvent::Noise;
            }
            if message.contains(MIDI_FALLBACK) {
                if let Some(url) = message.split_whitespace().last() {
                    return StatusEvent::MidiEndpoint(url.to_string());
                }
            }
        }
        StatusEvent::Text(cleaned)
    }

    /// Classify a line of the encoder's console
    pub fn parse_encoder_line(line: &str) -> StatusEvent {
        if ENCODER_NOISE.iter().any(|noise| line.contains(noise)) {
            return StatusEvent::Noise;
        }
        if let Some(frame) = Self::encoded_frame(line) {
            return StatusEvent::EncodedFrame(frame);
        }
        if line.is_empty() {
            return StatusEvent::Noise;
        }
        StatusEvent::Text(strip_hex_address(line))
    }

    fn encoded_frame(line: &str) -> Option<u64> {
        after(line, "frame=").and_then(first_number)
    }
}

fn after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker).map(|idx| &line[idx + marker.len()..])
}

fn first_number(text: &str) -> Option<u64> {
    text.split_whitespace().next()?.parse().ok()
}

fn parse_clock(value: &str) -> Option<f64> {
    TimeParser::new().parse_time(value).ok()
}

/// `..., 3930 kb/s, 25 fps, 25 tbr, ...` -> 25.0
fn parse_fps(line: &str) -> Option<f64> {
    let head = line.split("fps,").next()?;
    let value: f64 = head.rsplit(',').next()?.trim().parse().ok()?;
    (value > 0.0).then_some(value)
}

/// End of a leading `[tag]` prefix, if the line has one
fn tagged_prefix_end(line: &str) -> Option<usize> {
    if !line.starts_with('[') {
        return None;
    }
    line.find(']').map(|idx| idx + 1)
}

/// Remove `@ 0x0000...` object addresses from log prefixes.
///
/// `[libx264 @ 000001a44c6d0840] msg` becomes `[libx264] msg`. Matches an
/// optional space, `@`, an optional space, an optional `0x` and at least eight
/// hex digits.
pub fn strip_hex_address(line: &str) -> String {
    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'@' {
            i += 1;
            continue;
        }
        let mut digits_at = i + 1;
        if bytes.get(digits_at) == Some(&b' ') {
            digits_at += 1;
        }
        if bytes[digits_at.min(bytes.len())..].starts_with(b"0x") {
            digits_at += 2;
        }
        let digits = hex_run(bytes, digits_at);
        if digits < 8 {
            i += 1;
            continue;
        }

        let start = if i > copied && bytes[i - 1] == b' ' { i - 1 } else { i };
        out.push_str(&line[copied..start]);
        copied = digits_at + digits;
        i = copied;
    }
    out.push_str(&line[copied..]);
    out
}

fn hex_run(bytes: &[u8], from: usize) -> usize {
    bytes
        .iter()
        .skip(from)
        .take_while(|b| b.is_ascii_hexdigit())
        .count()
}
