//! Serial endpoints and transfer rates

use crate::error::CommandError;
use std::fmt;
use std::str::FromStr;

/// Transfer rates offered for the device link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BaudRate {
    B4800,
    #[default]
    B9600,
    B19200,
    B57600,
    B115200,
}

impl BaudRate {
    pub const ALL: [BaudRate; 5] = [
        BaudRate::B4800,
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B57600,
        BaudRate::B115200,
    ];

    /// Bits per second
    pub fn as_u32(self) -> u32 {
        match self {
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = CommandError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        BaudRate::ALL
            .into_iter()
            .find(|rate| rate.as_u32() == value)
            .ok_or(CommandError::BaudRate(value))
    }
}

impl FromStr for BaudRate {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| CommandError::BaudRateText(s.trim().to_string()))?;
        BaudRate::try_from(value)
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// An addressable device together with the rate to talk to it at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Platform device name, e.g. `COM3` or `/dev/ttyACM0`
    pub name: String,
    pub rate: BaudRate,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, rate: BaudRate) -> Self {
        Self {
            name: name.into(),
            rate,
        }
    }

    /// Same device at a different rate
    pub fn with_rate(&self, rate: BaudRate) -> Self {
        Self {
            name: self.name.clone(),
            rate,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {} baud", self.name, self.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_rate_parsing() {
        assert_eq!("115200".parse::<BaudRate>().unwrap(), BaudRate::B115200);
        assert_eq!(BaudRate::try_from(9600).unwrap(), BaudRate::default());
        assert_eq!(BaudRate::try_from(1200), Err(CommandError::BaudRate(1200)));
        assert_eq!(
            "fast".parse::<BaudRate>(),
            Err(CommandError::BaudRateText("fast".into()))
        );
        assert_eq!(
            " 96OO ".parse::<BaudRate>().unwrap_err().to_string(),
            "Baud rate is not a number: \"96OO\""
        );
    }

    #[test]
    fn test_endpoint_display() {
        let endpoint = Endpoint::new("COM11", BaudRate::B9600);
        assert_eq!(endpoint.to_string(), "COM11 at 9600 baud");
        assert_eq!(endpoint.with_rate(BaudRate::B57600).rate, BaudRate::B57600);
    }
}
