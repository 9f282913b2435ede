use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration as StdDuration;

/// A rate-limit window parsed from strings such as "1s", "15m", "1h", "1d"
/// or compounds like "1h30m". Bare integers are seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Duration(StdDuration);

impl Duration {
    pub const ZERO: Duration = Duration(StdDuration::ZERO);

    pub fn from_millis(millis: u64) -> Self {
        Duration(StdDuration::from_millis(millis))
    }

    pub fn from_secs(secs: u64) -> Self {
        Duration(StdDuration::from_secs(secs))
    }

    pub fn as_millis(&self) -> u128 {
        self.0.as_millis()
    }

    pub fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    pub fn as_std(&self) -> StdDuration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<StdDuration> for Duration {
    fn from(d: StdDuration) -> Self {
        Duration(d)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDurationError(String);

impl fmt::Display for ParseDurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid period: {}", self.0)
    }
}

impl std::error::Error for ParseDurationError {}

impl FromStr for Duration {
    type Err = ParseDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_period(s).map(Duration)
    }
}

const MILLI: u64 = 1;
const SECOND: u64 = 1_000 * MILLI;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

fn unit_millis(unit: &str) -> Option<u64> {
    match unit {
        "ms" => Some(MILLI),
        "s" => Some(SECOND),
        "m" => Some(MINUTE),
        "h" => Some(HOUR),
        "d" => Some(DAY),
        _ => None,
    }
}

fn parse_period(s: &str) -> Result<StdDuration, ParseDurationError> {
    let s = s.trim();

    if s.is_empty() {
        return Err(ParseDurationError("empty string".to_string()));
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(StdDuration::from_secs(secs));
    }

    let mut total_millis: f64 = 0.0;
    let mut remaining = s;

    while !remaining.is_empty() {
        let num_end = remaining
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(remaining.len());

        if num_end == 0 {
            return Err(ParseDurationError(format!("expected a number in: {}", s)));
        }

        let (num_str, rest) = remaining.split_at(num_end);

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());

        if unit_end == 0 {
            return Err(ParseDurationError(format!("missing unit in: {}", s)));
        }

        let (unit, rest) = rest.split_at(unit_end);
        remaining = rest;

        let value: f64 = num_str
            .parse()
            .map_err(|_| ParseDurationError(format!("invalid number: {}", num_str)))?;

        let per_unit = unit_millis(unit)
            .ok_or_else(|| ParseDurationError(format!("unknown unit: {}", unit)))?;

        total_millis += value * per_unit as f64;
    }

    Ok(StdDuration::from_millis(total_millis.round() as u64))
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut millis = self.0.as_millis() as u64;

        if millis == 0 {
            return write!(f, "0s");
        }

        for (unit, size) in [("d", DAY), ("h", HOUR), ("m", MINUTE), ("s", SECOND), ("ms", MILLI)] {
            if millis >= size {
                write!(f, "{}{}", millis / size, unit)?;
                millis %= size;
            }
        }

        Ok(())
    }
}

impl Serialize for Duration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PeriodVisitor;

        impl<'de> de::Visitor<'de> for PeriodVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a period like '1s', '15m', '1h', '1d' or a number of seconds")
            }

            fn visit_str<E>(self, value: &str) -> Result<Duration, E>
            where
                E: de::Error,
            {
                value.parse().map_err(de::Error::custom)
            }

            fn visit_i64<E>(self, value: i64) -> Result<Duration, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(de::Error::custom("period cannot be negative"));
                }
                Ok(Duration::from_secs(value as u64))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Duration, E>
            where
                E: de::Error,
            {
                Ok(Duration::from_secs(value))
            }
        }

        deserializer.deserialize_any(PeriodVisitor)
    }
}
