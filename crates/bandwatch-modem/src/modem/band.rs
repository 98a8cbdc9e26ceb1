//! # LTE Band Catalog
//!
//! Maps a downlink EARFCN to its E-UTRA operating band.
//!
//! ## Tiers
//!
//! | Tier      | Freq range       | Characteristic                    |
//! |-----------|------------------|-----------------------------------|
//! | Coverage  | below 1 GHz      | Long range, building penetration  |
//! | Balanced  | 1–2.3 GHz        | Mid-range, moderate capacity      |
//! | Capacity  | 2.3 GHz and up   | Short range, high throughput      |
//!
//! ## Usage
//!
//! ```
//! use bandwatch_modem::modem::band::band_for_earfcn;
//!
//! let band = band_for_earfcn(1575);
//! assert_eq!(band.number, 3);
//! println!("{band}");
//! ```

use std::fmt;

use serde::Serialize;

// ─── Band Catalog ───────────────────────────────────────────────────────────

/// Duplex scheme of a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Duplex {
    Fdd,
    Tdd,
    /// Supplemental downlink only.
    Sdl,
}

/// Coverage vs capacity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BandTier {
    Coverage,
    Balanced,
    Capacity,
}

impl BandTier {
    pub fn for_freq(freq_mhz: u16) -> Self {
        match freq_mhz {
            0..1000 => BandTier::Coverage,
            1000..2300 => BandTier::Balanced,
            _ => BandTier::Capacity,
        }
    }
}

impl fmt::Display for BandTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandTier::Coverage => write!(f, "coverage"),
            BandTier::Balanced => write!(f, "balanced"),
            BandTier::Capacity => write!(f, "capacity"),
        }
    }
}

/// E-UTRA operating band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Band {
    /// 3GPP band number; `0` for [`Band::UNKNOWN`].
    pub number: u16,
    /// Nominal downlink frequency in MHz.
    pub freq_mhz: u16,
    /// Inclusive downlink EARFCN range.
    pub dl_earfcn: (u32, u32),
    pub duplex: Duplex,
}

impl Band {
    /// Returned when the channel cannot be read or mapped.
    pub const UNKNOWN: Band = Band {
        number: 0,
        freq_mhz: 0,
        dl_earfcn: (0, 0),
        duplex: Duplex::Fdd,
    };

    const fn new(number: u16, freq_mhz: u16, first: u32, last: u32, duplex: Duplex) -> Self {
        Band {
            number,
            freq_mhz,
            dl_earfcn: (first, last),
            duplex,
        }
    }

    pub fn is_known(&self) -> bool {
        self.number != 0
    }

    pub fn tier(&self) -> BandTier {
        BandTier::for_freq(self.freq_mhz)
    }

    pub fn contains(&self, earfcn: u32) -> bool {
        self.is_known() && (self.dl_earfcn.0..=self.dl_earfcn.1).contains(&earfcn)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_known() {
            return write!(f, "unknown band");
        }
        write!(f, "B{} ({}MHz, {})", self.number, self.freq_mhz, self.tier())
    }
}

use Duplex::{Fdd, Sdl, Tdd};

/// E-UTRA bands ordered by downlink EARFCN (3GPP TS 36.101, table 5.7.3-1).
pub const LTE_BANDS: &[Band] = &[
    Band::new(1, 2100, 0, 599, Fdd),
    Band::new(2, 1900, 600, 1199, Fdd),
    Band::new(3, 1800, 1200, 1949, Fdd),
    Band::new(4, 2100, 1950, 2399, Fdd),
    Band::new(5, 850, 2400, 2649, Fdd),
    Band::new(6, 850, 2650, 2749, Fdd),
    Band::new(7, 2600, 2750, 3449, Fdd),
    Band::new(8, 900, 3450, 3799, Fdd),
    Band::new(9, 1800, 3800, 4149, Fdd),
    Band::new(10, 2100, 4150, 4749, Fdd),
    Band::new(11, 1500, 4750, 4949, Fdd),
    Band::new(12, 700, 5010, 5179, Fdd),
    Band::new(13, 700, 5180, 5279, Fdd),
    Band::new(14, 700, 5280, 5379, Fdd),
    Band::new(17, 700, 5730, 5849, Fdd),
    Band::new(18, 850, 5850, 5999, Fdd),
    Band::new(19, 850, 6000, 6149, Fdd),
    Band::new(20, 800, 6150, 6449, Fdd),
    Band::new(21, 1500, 6450, 6599, Fdd),
    Band::new(22, 3500, 6600, 7399, Fdd),
    Band::new(23, 2000, 7500, 7699, Fdd),
    Band::new(24, 1500, 7700, 8039, Fdd),
    Band::new(25, 1900, 8040, 8689, Fdd),
    Band::new(26, 850, 8690, 9039, Fdd),
    Band::new(27, 800, 9040, 9209, Fdd),
    Band::new(28, 700, 9210, 9659, Fdd),
    Band::new(29, 700, 9660, 9769, Sdl),
    Band::new(30, 2300, 9770, 9869, Fdd),
    Band::new(31, 450, 9870, 9919, Fdd),
    Band::new(32, 1500, 9920, 10359, Sdl),
    Band::new(33, 1900, 36000, 36199, Tdd),
    Band::new(34, 2000, 36200, 36349, Tdd),
    Band::new(35, 1900, 36350, 36949, Tdd),
    Band::new(36, 1900, 36950, 37549, Tdd),
    Band::new(37, 1900, 37550, 37749, Tdd),
    Band::new(38, 2600, 37750, 38249, Tdd),
    Band::new(39, 1900, 38250, 38649, Tdd),
    Band::new(40, 2300, 38650, 39649, Tdd),
    Band::new(41, 2500, 39650, 41589, Tdd),
    Band::new(42, 3500, 41590, 43589, Tdd),
    Band::new(43, 3700, 43590, 45589, Tdd),
    Band::new(44, 700, 45590, 46589, Tdd),
    Band::new(46, 5200, 46790, 54539, Tdd),
    Band::new(48, 3600, 55240, 56739, Tdd),
    Band::new(66, 2100, 66436, 67335, Fdd),
    Band::new(71, 600, 68586, 68935, Fdd),
];

/// First band in `catalog` whose downlink range contains `earfcn`.
pub fn resolve_earfcn(catalog: &[Band], earfcn: u32) -> Option<Band> {
    catalog.iter().find(|b| b.contains(earfcn)).copied()
}

/// Band for `earfcn` from [`LTE_BANDS`], or [`Band::UNKNOWN`].
pub fn band_for_earfcn(earfcn: u32) -> Band {
    resolve_earfcn(LTE_BANDS, earfcn).unwrap_or(Band::UNKNOWN)
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_ordered_and_disjoint() {
        for pair in LTE_BANDS.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(a.dl_earfcn.0 <= a.dl_earfcn.1, "{a} range inverted");
            assert!(
                a.dl_earfcn.1 < b.dl_earfcn.0,
                "{a} overlaps or is out of order with {b}"
            );
        }
    }

    #[test]
    fn band_edges() {
        assert_eq!(band_for_earfcn(0).number, 1);
        assert_eq!(band_for_earfcn(599).number, 1);
        assert_eq!(band_for_earfcn(600).number, 2);
        assert_eq!(band_for_earfcn(1575).number, 3);
        assert_eq!(band_for_earfcn(6300).number, 20);
        assert_eq!(band_for_earfcn(40000).number, 41);
        assert_eq!(band_for_earfcn(66786).number, 66);
        assert_eq!(band_for_earfcn(68700).number, 71);
    }

    #[test]
    fn gaps_are_unknown() {
        // Between band 11 and band 12.
        assert_eq!(band_for_earfcn(4960), Band::UNKNOWN);
        assert_eq!(band_for_earfcn(20000), Band::UNKNOWN);
        assert_eq!(band_for_earfcn(u32::MAX), Band::UNKNOWN);
    }

    #[test]
    fn unknown_never_matches() {
        assert!(!Band::UNKNOWN.contains(0));
        assert!(!Band::UNKNOWN.is_known());
    }

    #[test]
    fn tiers() {
        assert_eq!(band_for_earfcn(9400).tier(), BandTier::Coverage); // B28
        assert_eq!(band_for_earfcn(1575).tier(), BandTier::Balanced); // B3
        assert_eq!(band_for_earfcn(3000).tier(), BandTier::Capacity); // B7
    }

    #[test]
    fn display_formatting() {
        assert_eq!(band_for_earfcn(1575).to_string(), "B3 (1800MHz, balanced)");
        assert_eq!(Band::UNKNOWN.to_string(), "unknown band");
    }

    #[test]
    fn custom_catalog_resolution() {
        let catalog = [Band::new(99, 1000, 10, 20, Tdd)];
        assert_eq!(resolve_earfcn(&catalog, 15).map(|b| b.number), Some(99));
        assert_eq!(resolve_earfcn(&catalog, 21), None);
    }
}
