//! Common protocol types

use std::fmt;
use std::str::FromStr;

/// MAC address (6 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
    pub const ZERO: MacAddr = MacAddr([0, 0, 0, 0, 0, 0]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Render in one of the peer-address output formats used for
    /// calling/called-number reporting.
    pub fn render(&self, format: MacFormat) -> String {
        let b = &self.0;
        match format {
            MacFormat::Unformatted => format!(
                "{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
                b[0], b[1], b[2], b[3], b[4], b[5]
            ),
            MacFormat::UnixLike => self.to_string(),
            MacFormat::CiscoLike => format!(
                "{:02x}{:02x}.{:02x}{:02x}.{:02x}{:02x}",
                b[0], b[1], b[2], b[3], b[4], b[5]
            ),
            MacFormat::Ietf => format!(
                "{:02x}-{:02x}-{:02x}-{:02x}-{:02x}-{:02x}",
                b[0], b[1], b[2], b[3], b[4], b[5]
            ),
        }
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = crate::Error;

    /// Parse a MAC address from colon- or hyphen-separated notation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sep = if s.contains(':') { ':' } else { '-' };
        let parts: Vec<&str> = s.split(sep).collect();
        if parts.len() != 6 {
            return Err(crate::Error::Parse(format!("invalid MAC address {:?}", s)));
        }
        let mut out = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            out[i] = u8::from_str_radix(part, 16)
                .map_err(|_| crate::Error::Parse(format!("invalid MAC address {:?}", s)))?;
        }
        Ok(MacAddr(out))
    }
}

/// Peer MAC rendering selected by `set pppoe mac-format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MacFormat {
    #[default]
    Unformatted,
    UnixLike,
    CiscoLike,
    Ietf,
}

impl MacFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MacFormat::Unformatted => "unformatted",
            MacFormat::UnixLike => "unix-like",
            MacFormat::CiscoLike => "cisco-like",
            MacFormat::Ietf => "ietf",
        }
    }
}

impl fmt::Display for MacFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MacFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unformatted" => Ok(MacFormat::Unformatted),
            "unix-like" => Ok(MacFormat::UnixLike),
            "cisco-like" => Ok(MacFormat::CiscoLike),
            "ietf" => Ok(MacFormat::Ietf),
            _ => Err(crate::Error::Config(format!(
                "incorrect PPPoE mac-format {:?}",
                s
            ))),
        }
    }
}
