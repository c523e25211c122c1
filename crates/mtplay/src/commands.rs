//! Line-oriented transport commands read from stdin.

use anyhow::{Context, Result, anyhow, bail};

#[derive(Clone, Debug, PartialEq)]
pub enum Control {
    Play,
    Pause,
    /// Pause when playing, play otherwise.
    Toggle,
    Stop,
    Seek(f64),
    Rate(f64),
    Volume { track: u64, gain: f32 },
    Offset { track: u64, offset: f64 },
    Status,
    Tracks,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  play | pause | toggle | stop
  seek <seconds>
  rate <factor>
  volume <track> <gain>
  offset <track> <seconds>
  status | tracks | help | quit";

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Control>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let control = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("play" | "p", []) => Control::Play,
        ("pause", []) => Control::Pause,
        ("toggle" | "space", []) => Control::Toggle,
        ("stop", []) => Control::Stop,
        ("seek", [secs]) => Control::Seek(number(secs, "seek position")?),
        ("rate", [rate]) => Control::Rate(number(rate, "rate")?),
        ("volume" | "vol", [track, gain]) => Control::Volume {
            track: track_id(track)?,
            gain: number(gain, "gain")? as f32,
        },
        ("offset", [track, secs]) => Control::Offset {
            track: track_id(track)?,
            offset: number(secs, "offset")?,
        },
        ("status" | "s", []) => Control::Status,
        ("tracks", []) => Control::Tracks,
        ("help" | "?", []) => Control::Help,
        ("quit" | "q" | "exit", []) => Control::Quit,
        (
            "play" | "p" | "pause" | "toggle" | "space" | "stop" | "seek" | "rate" | "volume"
            | "vol" | "offset" | "status" | "s" | "tracks" | "help" | "?" | "quit" | "q" | "exit",
            _,
        ) => bail!("wrong number of arguments for '{verb}'"),
        _ => return Err(anyhow!("unknown command '{verb}' (try 'help')")),
    };
    Ok(Some(control))
}

fn number(raw: &str, what: &str) -> Result<f64> {
    raw.parse::<f64>()
        .with_context(|| format!("invalid {what}: {raw}"))
}

fn track_id(raw: &str) -> Result<u64> {
    raw.trim_start_matches('#')
        .parse::<u64>()
        .with_context(|| format!("invalid track id: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transport_words() {
        assert_eq!(parse("play").unwrap(), Some(Control::Play));
        assert_eq!(parse("  PAUSE ").unwrap(), Some(Control::Pause));
        assert_eq!(parse("q").unwrap(), Some(Control::Quit));
        assert_eq!(parse("").unwrap(), None);
    }

    #[test]
    fn parses_arguments() {
        assert_eq!(parse("seek 12.5").unwrap(), Some(Control::Seek(12.5)));
        assert_eq!(parse("rate 0.75").unwrap(), Some(Control::Rate(0.75)));
        assert_eq!(
            parse("volume #2 0.5").unwrap(),
            Some(Control::Volume { track: 2, gain: 0.5 })
        );
        assert_eq!(
            parse("offset 1 -0.5").unwrap(),
            Some(Control::Offset {
                track: 1,
                offset: -0.5
            })
        );
    }

    #[test]
    fn reports_bad_input() {
        assert!(parse("seek").is_err());
        assert!(parse("seek soon").is_err());
        assert!(parse("volume x 1").is_err());
        let err = parse("rewind").unwrap_err();
        assert!(err.to_string().contains("unknown command"));
    }
}
