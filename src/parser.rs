use crate::LinkError;
use alloc::vec::Vec;
use log::*;

/// Frame end
pub const END: u8 = 0xC0;

/// Frame escape
pub const ESC: u8 = 0xDB;

/// Transposed frame end
pub const ESC_END: u8 = 0xDC;

/// Transposed frame escape
pub const ESC_ESC: u8 = 0xDD;

// Define the machine states
machine!(
    #[derive(Clone, Debug, PartialEq)]
    enum SlipParser {
        Collecting,
        Escaped,
        Discarding,
        HaveFrame,
    }
);

/// The state transition types
#[derive(Clone, Debug, PartialEq)]
pub struct Advance {
    byte: u8,
}

// the allowed state, transition pairs
transitions!(SlipParser,
             [
                 (Collecting, Advance) => [Collecting, Escaped, HaveFrame],
                 (Escaped, Advance) => Collecting,
                 (Discarding, Advance) => [Discarding, HaveFrame],
                 (HaveFrame, Advance) => [Collecting, Escaped, HaveFrame]
             ]
);

// additional methods to add to the parser for retrieving data
methods!(SlipParser,
         [
             Collecting, HaveFrame => fn can_collect(&self) -> bool,
             Escaped => fn is_escaped(&self) -> bool,
             Discarding => fn is_discarding(&self) -> bool,
             HaveFrame => fn have_complete_frame(&self) -> bool
         ]
);

/// shared by every state that reads plain frame bytes
fn next_plain(byte: u8) -> SlipParser {
    match byte {
        END => SlipParser::have_frame(),
        ESC => SlipParser::escaped(),
        _ => SlipParser::collecting(),
    }
}

/// inside a frame, copying bytes through
impl Collecting {
    pub fn on_advance(self, input: Advance) -> SlipParser {
        next_plain(input.byte)
    }

    pub fn can_collect(&self) -> bool {
        true
    }
}

/// previous byte was ESC, this one is the transposed value
impl Escaped {
    pub fn on_advance(self, _input: Advance) -> Collecting {
        Collecting {}
    }

    pub fn is_escaped(&self) -> bool {
        true
    }
}

/// a bad escape was seen, drop everything up to the next END
impl Discarding {
    pub fn on_advance(self, input: Advance) -> SlipParser {
        if input.byte == END {
            SlipParser::have_frame()
        } else {
            SlipParser::discarding()
        }
    }

    pub fn is_discarding(&self) -> bool {
        true
    }
}

/// an END was just consumed, the frame buffer holds a complete payload
impl HaveFrame {
    pub fn on_advance(self, input: Advance) -> SlipParser {
        next_plain(input.byte)
    }

    pub fn can_collect(&self) -> bool {
        true
    }

    pub fn have_complete_frame(&self) -> bool {
        true
    }
}

impl SlipParser {
    pub fn new() -> SlipParser {
        SlipParser::Collecting(Collecting {})
    }

    /// Advance the machine by one received byte
    ///
    /// Payload bytes are appended to `frame`. The caller takes the frame
    /// away when the returned state reports `have_complete_frame`. An
    /// escape followed by anything but a transposed value is an error. The
    /// caller continues from `SlipParser::have_frame()` when that byte was
    /// END, otherwise from `SlipParser::discarding()`.
    pub fn parse_received_byte(
        self,
        byte: u8,
        frame: &mut Vec<u8>,
    ) -> Result<SlipParser, LinkError> {
        trace!("Parser <- advance {:?} byte:0x{:02x}", self, byte);
        if self.is_escaped().is_some() {
            match byte {
                ESC_END => frame.push(END),
                ESC_ESC => frame.push(ESC),
                _ => return Err(LinkError::InvalidEscape(byte)),
            }
        } else if self.can_collect().is_some() && byte != END && byte != ESC {
            frame.push(byte);
        }
        let p = self.on_advance(Advance { byte });
        trace!("Parser -> advance {:?} byte:0x{:02x}", p, byte);
        Ok(p)
    }
}

impl Default for SlipParser {
    fn default() -> Self {
        SlipParser::new()
    }
}
