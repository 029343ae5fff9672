//! TCP frame grammar (§4.4).
//!
//! UTF-8 lines terminated by `\n`, colon-separated, first token is the
//! command. `MSG` joins everything after the command back together (it may
//! itself contain colons) — every other frame is strictly positional.

use crate::error::NexusError;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Login {
        user: String,
        pass: String,
        file_tcp: Option<u16>,
        voice_udp: Option<u16>,
    },
    Msg {
        text: String,
    },
    Peer {
        user: String,
    },
    Users,
    WhiteboardOpen {
        peer: String,
    },
    WhiteboardDraw {
        sid: u64,
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        color: String,
        thickness: f64,
    },
    WhiteboardClear {
        sid: u64,
    },
    WhiteboardClose {
        sid: u64,
    },
    WhiteboardSync {
        sid: u64,
    },
}

fn bad(cause: impl Into<String>) -> NexusError {
    NexusError::Protocol(cause.into())
}

fn parse_u16(field: &str, what: &str) -> Result<u16, NexusError> {
    field.parse().map_err(|_| bad(format!("invalid {what}")))
}

fn parse_u64(field: &str, what: &str) -> Result<u64, NexusError> {
    field.parse().map_err(|_| bad(format!("invalid {what}")))
}

fn parse_f64(field: &str, what: &str) -> Result<f64, NexusError> {
    field.parse().map_err(|_| bad(format!("invalid {what}")))
}

pub fn parse_frame(line: &str) -> Result<Frame, NexusError> {
    let (command, rest) = match line.split_once(':') {
        Some((c, r)) => (c, r),
        None => (line, ""),
    };

    match command {
        "LOGIN" => {
            let parts: Vec<&str> = rest.split(':').collect();
            if parts.len() < 2 {
                return Err(bad("LOGIN requires user:pass"));
            }
            let user = parts[0].to_string();
            if user.is_empty() {
                return Err(bad("empty username"));
            }
            let pass = parts[1].to_string();
            let file_tcp = match parts.get(2) {
                Some(p) if !p.is_empty() => Some(parse_u16(p, "fileTcp")?),
                _ => None,
            };
            let voice_udp = match parts.get(3) {
                Some(p) if !p.is_empty() => Some(parse_u16(p, "voiceUdp")?),
                _ => None,
            };
            Ok(Frame::Login {
                user,
                pass,
                file_tcp,
                voice_udp,
            })
        }
        "MSG" => Ok(Frame::Msg {
            text: rest.to_string(),
        }),
        "PEER" => {
            if rest.is_empty() {
                return Err(bad("PEER requires a username"));
            }
            Ok(Frame::Peer {
                user: rest.to_string(),
            })
        }
        "USERS" => Ok(Frame::Users),
        "WHITEBOARD_OPEN" => {
            if rest.is_empty() {
                return Err(bad("WHITEBOARD_OPEN requires a peer"));
            }
            Ok(Frame::WhiteboardOpen {
                peer: rest.to_string(),
            })
        }
        "WHITEBOARD_DRAW" => {
            let parts: Vec<&str> = rest.split(':').collect();
            if parts.len() != 7 {
                return Err(bad("WHITEBOARD_DRAW requires sid:x1:y1:x2:y2:color:thick"));
            }
            Ok(Frame::WhiteboardDraw {
                sid: parse_u64(parts[0], "sid")?,
                x1: parse_f64(parts[1], "x1")?,
                y1: parse_f64(parts[2], "y1")?,
                x2: parse_f64(parts[3], "x2")?,
                y2: parse_f64(parts[4], "y2")?,
                color: parts[5].to_string(),
                thickness: parse_f64(parts[6], "thickness")?,
            })
        }
        "WHITEBOARD_CLEAR" => Ok(Frame::WhiteboardClear {
            sid: parse_u64(rest, "sid")?,
        }),
        "WHITEBOARD_CLOSE" => Ok(Frame::WhiteboardClose {
            sid: parse_u64(rest, "sid")?,
        }),
        "WHITEBOARD_SYNC" => Ok(Frame::WhiteboardSync {
            sid: parse_u64(rest, "sid")?,
        }),
        other => Err(bad(format!("unknown command: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_login_with_optional_ports() {
        assert_eq!(
            parse_frame("LOGIN:alice:secret").unwrap(),
            Frame::Login {
                user: "alice".into(),
                pass: "secret".into(),
                file_tcp: None,
                voice_udp: None,
            }
        );

        assert_eq!(
            parse_frame("LOGIN:alice:secret:9000:9001").unwrap(),
            Frame::Login {
                user: "alice".into(),
                pass: "secret".into(),
                file_tcp: Some(9000),
                voice_udp: Some(9001),
            }
        );
    }

    #[test]
    fn msg_preserves_internal_colons() {
        assert_eq!(
            parse_frame("MSG:10:30am see you there").unwrap(),
            Frame::Msg {
                text: "10:30am see you there".into()
            }
        );
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(parse_frame("FROBNICATE:1").is_err());
    }

    #[test]
    fn malformed_whiteboard_draw_is_an_error() {
        assert!(parse_frame("WHITEBOARD_DRAW:1:2:3").is_err());
    }
}
