//! Client escape-command parser (§4.7.1). Feeds raw client bytes in and
//! returns a (passthrough bytes, command events) split, the interface the
//! core requires of whatever protocol layer drives it (§9 open question);
//! this module supplies the default the bundled binary runs with.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Detach,
    Suspend,
    Resume,
    ToggleBroadcast,
    RequestReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    SawLead,
}

pub struct EscapeParser {
    lead: u8,
    state: State,
}

impl EscapeParser {
    pub fn new(lead: u8) -> EscapeParser {
        EscapeParser { lead, state: State::Data }
    }
}

impl Default for EscapeParser {
    fn default() -> Self {
        EscapeParser::new(b'&')
    }
}

impl EscapeParser {
    /// Consumes `input`, stripping recognized two-character escapes
    /// (lead byte + command character) and returning the remaining bytes
    /// plus any commands they triggered, in order.
    pub fn decode(&mut self, input: &[u8]) -> (Vec<u8>, Vec<Command>) {
        let mut passthrough = Vec::with_capacity(input.len());
        let mut commands = Vec::new();

        for &b in input {
            match self.state {
                State::Data => {
                    if b == self.lead {
                        self.state = State::SawLead;
                    } else {
                        passthrough.push(b);
                    }
                }
                State::SawLead => {
                    self.state = State::Data;
                    match b {
                        b'.' => commands.push(Command::Detach),
                        b'z' => commands.push(Command::Suspend),
                        b'q' => commands.push(Command::Resume),
                        b'b' => commands.push(Command::ToggleBroadcast),
                        b'!' => commands.push(Command::RequestReset),
                        lead if lead == self.lead => passthrough.push(self.lead),
                        other => {
                            // Not a recognized command: pass the lead byte
                            // and this byte through verbatim (§4.7.1).
                            passthrough.push(self.lead);
                            passthrough.push(other);
                        }
                    }
                }
            }
        }
        (passthrough, commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_detach_and_strips_it() {
        let mut p = EscapeParser::default();
        let (data, cmds) = p.decode(b"hello&.world");
        assert_eq!(data, b"helloworld");
        assert_eq!(cmds, vec![Command::Detach]);
    }

    #[test]
    fn unrecognized_escape_passes_through_verbatim() {
        let mut p = EscapeParser::default();
        let (data, cmds) = p.decode(b"a&xb");
        assert_eq!(data, b"a&xb");
        assert!(cmds.is_empty());
    }

    #[test]
    fn literal_lead_byte_escape() {
        let mut p = EscapeParser::default();
        let (data, cmds) = p.decode(b"a&&b");
        assert_eq!(data, b"a&b");
        assert!(cmds.is_empty());
    }

    #[test]
    fn escape_split_across_two_reads_still_recognized() {
        let mut p = EscapeParser::default();
        let (d1, c1) = p.decode(b"hi&");
        let (d2, c2) = p.decode(b".bye");
        assert_eq!([d1, d2].concat(), b"hibye");
        assert!(c1.is_empty());
        assert_eq!(c2, vec![Command::Detach]);
    }
}
