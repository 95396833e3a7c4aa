//! Timecode and frame-rate handling
//!
//! Devices report either an embedded SMPTE timecode (`hh:mm:ss:ff`) or a raw frame
//! counter. Both are normalized into a [`Timecode`] at a [`FrameRate`]. Drop-frame
//! rates (29.97 and 59.94 DF) skip frame numbers at the start of every minute except
//! each tenth minute.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Highest whole-frame rate a timecode can represent.
pub const MAX_NOMINAL_FPS: u32 = 255;

/// Exact rational frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
    pub drop_frame: bool,
}

impl FrameRate {
    pub const FPS_23_976: FrameRate = FrameRate::ntsc(24000);
    pub const FPS_24: FrameRate = FrameRate::whole(24);
    pub const FPS_25: FrameRate = FrameRate::whole(25);
    pub const FPS_29_97: FrameRate = FrameRate::ntsc(30000);
    pub const FPS_29_97_DROP: FrameRate =
        FrameRate { numerator: 30000, denominator: 1001, drop_frame: true };
    pub const FPS_30: FrameRate = FrameRate::whole(30);
    pub const FPS_59_94: FrameRate = FrameRate::ntsc(60000);

    const fn whole(fps: u32) -> Self {
        FrameRate { numerator: fps, denominator: 1, drop_frame: false }
    }

    const fn ntsc(numerator: u32) -> Self {
        FrameRate { numerator, denominator: 1001, drop_frame: false }
    }

    /// Map a device rate preset code to a rate. Code 0 means "custom", which the
    /// caller resolves to its configured default.
    pub fn from_preset_code(code: u8) -> Option<FrameRate> {
        match code {
            1 => Some(FrameRate::FPS_29_97_DROP),
            2 => Some(FrameRate::FPS_29_97),
            3 => Some(FrameRate::FPS_25),
            // M-PAL is carried as 29.97 non-drop
            4 => Some(FrameRate::FPS_29_97),
            5 => Some(FrameRate::FPS_24),
            6 => Some(FrameRate::FPS_23_976),
            7 => Some(FrameRate::FPS_30),
            8 => Some(FrameRate::FPS_59_94),
            _ => None,
        }
    }

    /// Inverse of [`FrameRate::from_preset_code`]; 0 for rates without a preset.
    pub fn preset_code(&self) -> u8 {
        match *self {
            FrameRate::FPS_29_97_DROP => 1,
            FrameRate::FPS_29_97 => 2,
            FrameRate::FPS_25 => 3,
            FrameRate::FPS_24 => 5,
            FrameRate::FPS_23_976 => 6,
            FrameRate::FPS_30 => 7,
            FrameRate::FPS_59_94 => 8,
            _ => 0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Whole frames per timecode second (30 for 29.97).
    pub fn nominal(&self) -> u32 {
        let numerator = u64::from(self.numerator);
        let denominator = u64::from(self.denominator.max(1));
        u32::try_from((numerator + denominator / 2) / denominator).unwrap_or(u32::MAX)
    }

    fn dropped_per_minute(&self) -> u64 {
        if self.drop_frame { u64::from(self.nominal() / 15) } else { 0 }
    }

    pub(crate) fn validate(self) -> Result<Self, String> {
        if self.numerator == 0 || self.denominator == 0 {
            return Err("frame rate must be positive".to_string());
        }
        // Frame numbers within a second are carried in one byte
        if !(1..=MAX_NOMINAL_FPS).contains(&self.nominal()) {
            return Err(format!("frame rate {} is outside 1..={} fps", self, MAX_NOMINAL_FPS));
        }
        if self.drop_frame && self.nominal() % 30 != 0 {
            return Err(format!("drop-frame is only defined for 29.97 and 59.94, not {}", self));
        }
        Ok(self)
    }
}

impl Default for FrameRate {
    /// PAL, the device default.
    fn default() -> Self {
        FrameRate::FPS_25
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.numerator, self.denominator) {
            (fps, 1) => write!(f, "{}", fps)?,
            (24000, 1001) => f.write_str("23.976")?,
            (30000, 1001) => f.write_str("29.97")?,
            (60000, 1001) => f.write_str("59.94")?,
            (num, den) => write!(f, "{}/{}", num, den)?,
        }
        if self.drop_frame {
            f.write_str("df")?;
        }
        Ok(())
    }
}

impl FromStr for FrameRate {
    type Err = String;

    /// Accepts `"25"`, `"29.97"`, `"29.97df"`, `"23.976"`, `"59.94"` or `"30000/1001"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();
        let (body, drop_frame) = match trimmed.strip_suffix("df") {
            Some(body) => (body.trim(), true),
            None => (trimmed.as_str(), false),
        };

        let rate = if let Some((num, den)) = body.split_once('/') {
            let numerator = num.trim().parse().map_err(|e| format!("bad numerator: {e}"))?;
            let denominator = den.trim().parse().map_err(|e| format!("bad denominator: {e}"))?;
            FrameRate { numerator, denominator, drop_frame }
        } else {
            let rate = match body {
                "23.976" | "23.98" => FrameRate::FPS_23_976,
                "29.97" => FrameRate::FPS_29_97,
                "59.94" => FrameRate::FPS_59_94,
                whole => {
                    let fps: u32 = whole.parse().map_err(|_| format!("unknown frame rate '{s}'"))?;
                    FrameRate::whole(fps)
                }
            };
            FrameRate { drop_frame, ..rate }
        };

        rate.validate()
    }
}

/// SMPTE timecode at a specific frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Timecode {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
    pub rate: FrameRate,
}

impl Timecode {
    /// Build a timecode, returning `None` if any field is out of range for the rate.
    pub fn new(hours: u8, minutes: u8, seconds: u8, frames: u8, rate: FrameRate) -> Option<Self> {
        if hours >= 24 || minutes >= 60 || seconds >= 60 || u32::from(frames) >= rate.nominal() {
            return None;
        }
        Some(Self { hours, minutes, seconds, frames, rate })
    }

    /// Convert an absolute frame count into a timecode, wrapping at 24 hours.
    pub fn from_frame_number(frame_number: u64, rate: FrameRate) -> Self {
        let nominal = u64::from(rate.nominal().max(1));
        let drop = rate.dropped_per_minute();
        let mut n = frame_number;

        if drop > 0 {
            let per_ten_minutes = nominal * 600 - drop * 9;
            let per_minute = nominal * 60 - drop;
            let tens = n / per_ten_minutes;
            let rem = n % per_ten_minutes;
            n += drop * 9 * tens;
            if rem > drop {
                n += drop * ((rem - drop) / per_minute);
            }
        }

        let frames = n % nominal;
        let total_seconds = n / nominal;
        Self {
            hours: ((total_seconds / 3600) % 24) as u8,
            minutes: ((total_seconds / 60) % 60) as u8,
            seconds: (total_seconds % 60) as u8,
            frames: u8::try_from(frames).unwrap_or(u8::MAX),
            rate,
        }
    }

    /// Absolute frame count since midnight.
    pub fn to_frame_number(&self) -> u64 {
        let nominal = u64::from(self.rate.nominal());
        let total_minutes = u64::from(self.hours) * 60 + u64::from(self.minutes);
        let total_seconds = total_minutes * 60 + u64::from(self.seconds);
        let raw = total_seconds * nominal + u64::from(self.frames);
        let drop = self.rate.dropped_per_minute();
        raw - drop * (total_minutes - total_minutes / 10)
    }

    /// Elapsed real time since midnight.
    pub fn to_duration(&self) -> Duration {
        let nanos = u128::from(self.to_frame_number()) * u128::from(self.rate.denominator)
            * 1_000_000_000
            / u128::from(self.rate.numerator.max(1));
        Duration::from_nanos(nanos as u64)
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = if self.rate.drop_frame { ';' } else { ':' };
        write!(
            f,
            "{:02}:{:02}:{:02}{}{:02}",
            self.hours, self.minutes, self.seconds, separator, self.frames
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn preset_codes_round_trip() {
        for code in [1u8, 2, 3, 5, 6, 7, 8] {
            let rate = FrameRate::from_preset_code(code).unwrap();
            assert_eq!(rate.preset_code(), code);
        }
        assert_eq!(FrameRate::from_preset_code(0), None);
        assert_eq!(FrameRate::from_preset_code(4), Some(FrameRate::FPS_29_97));
    }

    #[test]
    fn parses_common_rates() {
        assert_eq!("25".parse::<FrameRate>().unwrap(), FrameRate::FPS_25);
        assert_eq!("29.97df".parse::<FrameRate>().unwrap(), FrameRate::FPS_29_97_DROP);
        assert_eq!("23.976".parse::<FrameRate>().unwrap(), FrameRate::FPS_23_976);
        assert_eq!("60000/1001".parse::<FrameRate>().unwrap(), FrameRate::FPS_59_94);
        assert!("25df".parse::<FrameRate>().is_err());
        assert!("0".parse::<FrameRate>().is_err());
        assert!("fast".parse::<FrameRate>().is_err());
    }

    #[test]
    fn rates_outside_one_byte_of_frames_are_rejected() {
        assert_eq!("255".parse::<FrameRate>().unwrap().nominal(), 255);
        assert_eq!("1/2".parse::<FrameRate>().unwrap().nominal(), 1);
        assert!("256".parse::<FrameRate>().is_err());
        assert!("1/3".parse::<FrameRate>().is_err());
        assert!("4294967295/1001".parse::<FrameRate>().is_err());
        assert!("4294967295/1".parse::<FrameRate>().is_err());
    }

    #[test]
    fn nominal_does_not_overflow_on_huge_rates() {
        let rate = FrameRate { numerator: u32::MAX, denominator: 1001, drop_frame: false };
        assert_eq!(rate.nominal(), 4_290_677);
        assert!(rate.validate().is_err());
    }

    #[test]
    fn display_parses_back() {
        for rate in [FrameRate::FPS_23_976, FrameRate::FPS_29_97_DROP, FrameRate::FPS_59_94] {
            assert_eq!(rate.to_string().parse::<FrameRate>().unwrap(), rate);
        }
        assert_eq!(FrameRate::FPS_29_97_DROP.to_string(), "29.97df");
    }

    #[test]
    fn drop_frame_skips_first_two_numbers_of_minute() {
        let rate = FrameRate::FPS_29_97_DROP;
        // 00:00:59;29 is frame 1799, the next frame is 00:01:00;02
        let last = Timecode::from_frame_number(1799, rate);
        assert_eq!(last.to_string(), "00:00:59;29");
        let next = Timecode::from_frame_number(1800, rate);
        assert_eq!(next.to_string(), "00:01:00;02");
        // every tenth minute keeps its first frames
        let ten = Timecode::from_frame_number(17982, rate);
        assert_eq!(ten.to_string(), "00:10:00;00");
    }

    #[test]
    fn one_hour_of_drop_frame_is_107892_frames() {
        let hour = Timecode::new(1, 0, 0, 0, FrameRate::FPS_29_97_DROP).unwrap();
        assert_eq!(hour.to_frame_number(), 107_892);
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert!(Timecode::new(24, 0, 0, 0, FrameRate::FPS_25).is_none());
        assert!(Timecode::new(0, 60, 0, 0, FrameRate::FPS_25).is_none());
        assert!(Timecode::new(0, 0, 0, 25, FrameRate::FPS_25).is_none());
        assert!(Timecode::new(23, 59, 59, 24, FrameRate::FPS_25).is_some());
    }

    #[test]
    fn duration_uses_exact_rate() {
        let tc = Timecode::new(0, 0, 1, 0, FrameRate::FPS_25).unwrap();
        assert_eq!(tc.to_duration(), Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn frame_number_round_trips(
            n in 0u64..2_000_000,
            rate in prop::sample::select(vec![
                FrameRate::FPS_23_976, FrameRate::FPS_24, FrameRate::FPS_25,
                FrameRate::FPS_29_97, FrameRate::FPS_29_97_DROP, FrameRate::FPS_30,
                FrameRate::FPS_59_94,
            ])
        ) {
            let tc = Timecode::from_frame_number(n, rate);
            prop_assert_eq!(tc.to_frame_number(), n);
        }
    }
}
