//! Media search filters and their compact integer encoding.
//!
//! Every concrete option owns one fixed bit position (1-based) in a 47-bit
//! integer. The integer is part of cache directory names and storage keys, so
//! positions must never be renumbered.

use std::collections::BTreeSet;

use crate::error::MediaError;
use crate::media_kind::MediaKind;

/// Number of bit positions used by the integer encoding.
pub const FILTER_BITS: u32 = 47;
/// Exclusive upper bound of valid filter integers.
pub const FILTER_INT_LIMIT: i64 = 1 << FILTER_BITS;

macro_rules! filter_values {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident => $code:literal, $label:literal, $bit:literal, [$($alias:literal),* $(,)?];)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// Upstream query value.
            pub fn code(self) -> &'static str {
                match self {
                    $(Self::$variant => $code,)+
                }
            }

            pub fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }

            pub fn bit(self) -> u32 {
                match self {
                    $(Self::$variant => $bit,)+
                }
            }

            fn aliases(self) -> &'static [&'static str] {
                match self {
                    $(Self::$variant => &[$($alias),*],)+
                }
            }

            pub fn from_code(code: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|value| value.code() == code)
            }
        }
    };
}

filter_values! {
    Age {
        Adult => "a", "adult", 1, ["adult", "a"];
        Immature => "i", "immature", 2, ["immature", "i"];
        Juvenile => "j", "juvenile", 3, ["juvenile", "j"];
        Unknown => "u", "unknown", 4, ["age:unknown", "unknown age"];
    }
}

filter_values! {
    Sex {
        Male => "m", "male", 5, ["male", "m"];
        Female => "f", "female", 6, ["female", "f"];
        Unknown => "u", "unknown", 7, ["sex:unknown", "unknown sex"];
    }
}

filter_values! {
    Behavior {
        Eating => "e", "eating/foraging", 8, ["eating", "foraging", "e", "ef"];
        Flying => "f", "flying", 9, ["flying", "fly"];
        Preening => "p", "preening", 10, ["preening", "p"];
        Vocalizing => "vocalizing", "vocalizing", 11, ["vocalizing", "vo"];
        Molting => "molting", "molting", 12, ["molting", "mo"];
    }
}

filter_values! {
    Breeding {
        Courtship => "cdc", "courtship, display, or copulation", 13,
            ["courtship", "display", "copulation", "cdc"];
        FeedingYoung => "fy", "feeding young", 14, ["feeding", "feeding young", "fy"];
        CarryingFood => "cf", "carrying food", 15, ["food", "carrying food", "cf"];
        CarryingFecalSac => "cfs", "carrying fecal sac", 16,
            ["fecal", "carrying fecal sac", "fecal sac", "cfs"];
        NestBuilding => "nb", "nest building", 17, ["nest", "building", "nest building", "nb"];
    }
}

filter_values! {
    /// Sound types. `Environmental` and `People` are sent upstream as tags.
    Sound {
        Song => "s", "song", 18, ["song", "s"];
        Call => "c", "call", 19, ["call", "c"];
        NonVocal => "nv", "non-vocal", 20, ["non-vocal", "non vocal", "nv"];
        DawnSong => "ds", "dawn song", 21, ["dawn", "dawn song", "ds"];
        FlightSong => "fs", "flight song", 22, ["flight song", "fs"];
        FlightCall => "fc", "flight call", 23, ["flight call", "fc"];
        Duet => "dt", "duet", 24, ["duet", "dt"];
        Environmental => "env", "environmental", 25, ["environmental", "env"];
        People => "peo", "people", 26, ["people", "peo"];
    }
}

filter_values! {
    PhotoTag {
        MultipleSpecies => "mul", "multiple species", 27,
            ["multiple", "species", "multiple species", "mul"];
        InHand => "in", "in-hand", 28, ["in-hand", "in hand"];
        Nest => "nes", "nest", 29, ["nest", "nes"];
        Eggs => "egg", "eggs", 30, ["egg", "eggs"];
        Habitat => "hab", "habitat", 31, ["habitat", "hab"];
        Watermark => "wat", "watermark", 32, ["watermark", "wat"];
        BackOfCamera => "bac", "back of camera", 33, ["back of camera", "camera", "back", "bac"];
        Dead => "dea", "dead", 34, ["dead", "dea"];
        FieldNotes => "fie", "field notes/sketch", 35, ["field", "field notes", "sketch"];
        NoBird => "non", "no bird", 36, ["none", "no bird", "non"];
    }
}

filter_values! {
    Captivity {
        All => "all", "all", 37, ["captive:all"];
        Yes => "yes", "yes", 38, ["captive"];
        No => "no", "no", 39, ["captive:no", "not captive"];
    }
}

filter_values! {
    Quality {
        Unrated => "0", "no rating", 40, ["no rating", "q0"];
        Terrible => "1", "terrible", 41, ["terrible", "q1"];
        Poor => "2", "poor", 42, ["poor", "q2"];
        Average => "3", "average", 43, ["average", "avg", "q3"];
        Good => "4", "good", 44, ["good", "q4"];
        Excellent => "5", "excellent", 45, ["excellent", "best", "q5"];
    }
}

const SMALL_BIT: u32 = 46;
const BLACK_AND_WHITE_BIT: u32 = 47;

/// One filter dimension, in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDimension {
    Age,
    Sex,
    Behavior,
    Breeding,
    Sounds,
    Tags,
    Captive,
    Quality,
    Small,
    BlackAndWhite,
}

impl FilterDimension {
    pub const ALL: &'static [Self] = &[
        Self::Age,
        Self::Sex,
        Self::Behavior,
        Self::Breeding,
        Self::Sounds,
        Self::Tags,
        Self::Captive,
        Self::Quality,
        Self::Small,
        Self::BlackAndWhite,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|dimension| dimension.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Sex => "sex",
            Self::Behavior => "behavior",
            Self::Breeding => "breeding",
            Self::Sounds => "sounds",
            Self::Tags => "tags",
            Self::Captive => "captive",
            Self::Quality => "quality",
            Self::Small => "small",
            Self::BlackAndWhite => "bw",
        }
    }

    /// Catalog query parameter name; booleans never reach the query.
    fn query_param(self) -> Option<&'static str> {
        match self {
            Self::Age => Some("age"),
            Self::Sex => Some("sex"),
            Self::Behavior => Some("beh"),
            Self::Breeding => Some("bre"),
            Self::Sounds => Some("behaviors"),
            Self::Tags => Some("tag"),
            Self::Captive => Some("cap"),
            Self::Quality => Some("qua"),
            Self::Small | Self::BlackAndWhite => None,
        }
    }
}

/// A single concrete filter option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterToken {
    Age(Age),
    Sex(Sex),
    Behavior(Behavior),
    Breeding(Breeding),
    Sound(Sound),
    Tag(PhotoTag),
    Captive(Captivity),
    Quality(Quality),
    Small,
    BlackAndWhite,
}

impl FilterToken {
    /// All options in bit order.
    fn all() -> impl Iterator<Item = FilterToken> {
        Age::ALL
            .iter()
            .map(|value| Self::Age(*value))
            .chain(Sex::ALL.iter().map(|value| Self::Sex(*value)))
            .chain(Behavior::ALL.iter().map(|value| Self::Behavior(*value)))
            .chain(Breeding::ALL.iter().map(|value| Self::Breeding(*value)))
            .chain(Sound::ALL.iter().map(|value| Self::Sound(*value)))
            .chain(PhotoTag::ALL.iter().map(|value| Self::Tag(*value)))
            .chain(Captivity::ALL.iter().map(|value| Self::Captive(*value)))
            .chain(Quality::ALL.iter().map(|value| Self::Quality(*value)))
            .chain([Self::Small, Self::BlackAndWhite])
    }

    pub fn bit(self) -> u32 {
        match self {
            Self::Age(value) => value.bit(),
            Self::Sex(value) => value.bit(),
            Self::Behavior(value) => value.bit(),
            Self::Breeding(value) => value.bit(),
            Self::Sound(value) => value.bit(),
            Self::Tag(value) => value.bit(),
            Self::Captive(value) => value.bit(),
            Self::Quality(value) => value.bit(),
            Self::Small => SMALL_BIT,
            Self::BlackAndWhite => BLACK_AND_WHITE_BIT,
        }
    }

    pub fn dimension(self) -> FilterDimension {
        match self {
            Self::Age(_) => FilterDimension::Age,
            Self::Sex(_) => FilterDimension::Sex,
            Self::Behavior(_) => FilterDimension::Behavior,
            Self::Breeding(_) => FilterDimension::Breeding,
            Self::Sound(_) => FilterDimension::Sounds,
            Self::Tag(_) => FilterDimension::Tags,
            Self::Captive(_) => FilterDimension::Captive,
            Self::Quality(_) => FilterDimension::Quality,
            Self::Small => FilterDimension::Small,
            Self::BlackAndWhite => FilterDimension::BlackAndWhite,
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Age(value) => value.aliases(),
            Self::Sex(value) => value.aliases(),
            Self::Behavior(value) => value.aliases(),
            Self::Breeding(value) => value.aliases(),
            Self::Sound(value) => value.aliases(),
            Self::Tag(value) => value.aliases(),
            Self::Captive(value) => value.aliases(),
            Self::Quality(value) => value.aliases(),
            Self::Small => &["small", "smaller images"],
            Self::BlackAndWhite => &["bw", "b&w"],
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Age(value) => value.label(),
            Self::Sex(value) => value.label(),
            Self::Behavior(value) => value.label(),
            Self::Breeding(value) => value.label(),
            Self::Sound(value) => value.label(),
            Self::Tag(value) => value.label(),
            Self::Captive(value) => value.label(),
            Self::Quality(value) => value.label(),
            Self::Small | Self::BlackAndWhite => "yes",
        }
    }

    fn from_bit(bit: u32) -> Option<Self> {
        Self::all().find(|token| token.bit() == bit)
    }

    /// Resolves a user-typed alias or bit number. When two options share an
    /// alias, the option with the higher bit position wins.
    pub fn resolve_alias(alias: &str) -> Option<Self> {
        Self::all()
            .filter(|token| {
                token.bit().to_string() == alias || token.aliases().contains(&alias)
            })
            .last()
    }
}

/// Validated media filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSet {
    age: BTreeSet<Age>,
    sex: BTreeSet<Sex>,
    behavior: BTreeSet<Behavior>,
    breeding: BTreeSet<Breeding>,
    sounds: BTreeSet<Sound>,
    tags: BTreeSet<PhotoTag>,
    captive: BTreeSet<Captivity>,
    quality: BTreeSet<Quality>,
    small: bool,
    black_and_white: bool,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self {
            quality: [Quality::Average, Quality::Good, Quality::Excellent]
                .into_iter()
                .collect(),
            ..Self::empty()
        }
    }
}

fn parse_codes<T: Copy + Ord>(
    dimension: FilterDimension,
    codes: &str,
    from_code: fn(&str) -> Option<T>,
) -> Result<BTreeSet<T>, MediaError> {
    codes
        .split_whitespace()
        .map(|code| {
            from_code(code).ok_or_else(|| {
                MediaError::Validation(format!("'{code}' is not a valid {} value", dimension.name()))
            })
        })
        .collect()
}

impl FilterSet {
    /// Filters with every dimension cleared, including quality.
    fn empty() -> Self {
        Self {
            age: BTreeSet::new(),
            sex: BTreeSet::new(),
            behavior: BTreeSet::new(),
            breeding: BTreeSet::new(),
            sounds: BTreeSet::new(),
            tags: BTreeSet::new(),
            captive: BTreeSet::new(),
            quality: BTreeSet::new(),
            small: false,
            black_and_white: false,
        }
    }

    /// Replaces one set-valued dimension with space-separated upstream codes.
    /// Codes outside the dimension's vocabulary fail the whole call.
    pub fn with_codes(mut self, dimension: FilterDimension, codes: &str) -> Result<Self, MediaError> {
        match dimension {
            FilterDimension::Age => self.age = parse_codes(dimension, codes, Age::from_code)?,
            FilterDimension::Sex => self.sex = parse_codes(dimension, codes, Sex::from_code)?,
            FilterDimension::Behavior => {
                self.behavior = parse_codes(dimension, codes, Behavior::from_code)?
            }
            FilterDimension::Breeding => {
                self.breeding = parse_codes(dimension, codes, Breeding::from_code)?
            }
            FilterDimension::Sounds => self.sounds = parse_codes(dimension, codes, Sound::from_code)?,
            FilterDimension::Tags => self.tags = parse_codes(dimension, codes, PhotoTag::from_code)?,
            FilterDimension::Captive => {
                self.captive = parse_codes(dimension, codes, Captivity::from_code)?
            }
            FilterDimension::Quality => {
                self.quality = parse_codes(dimension, codes, Quality::from_code)?
            }
            FilterDimension::Small | FilterDimension::BlackAndWhite => {
                return Err(MediaError::Validation(format!(
                    "{} is a boolean filter",
                    dimension.name()
                )));
            }
        }
        Ok(self)
    }

    pub fn with_small(mut self, small: bool) -> Self {
        self.small = small;
        self
    }

    pub fn with_black_and_white(mut self, black_and_white: bool) -> Self {
        self.black_and_white = black_and_white;
        self
    }

    pub fn small(&self) -> bool {
        self.small
    }

    pub fn black_and_white(&self) -> bool {
        self.black_and_white
    }

    fn insert(&mut self, token: FilterToken) {
        match token {
            FilterToken::Age(value) => {
                self.age.insert(value);
            }
            FilterToken::Sex(value) => {
                self.sex.insert(value);
            }
            FilterToken::Behavior(value) => {
                self.behavior.insert(value);
            }
            FilterToken::Breeding(value) => {
                self.breeding.insert(value);
            }
            FilterToken::Sound(value) => {
                self.sounds.insert(value);
            }
            FilterToken::Tag(value) => {
                self.tags.insert(value);
            }
            FilterToken::Captive(value) => {
                self.captive.insert(value);
            }
            FilterToken::Quality(value) => {
                self.quality.insert(value);
            }
            FilterToken::Small => self.small = true,
            FilterToken::BlackAndWhite => self.black_and_white = true,
        }
    }

    /// Active options in bit order.
    pub fn tokens(&self) -> Vec<FilterToken> {
        let mut tokens: Vec<FilterToken> = Vec::new();
        tokens.extend(self.age.iter().map(|value| FilterToken::Age(*value)));
        tokens.extend(self.sex.iter().map(|value| FilterToken::Sex(*value)));
        tokens.extend(self.behavior.iter().map(|value| FilterToken::Behavior(*value)));
        tokens.extend(self.breeding.iter().map(|value| FilterToken::Breeding(*value)));
        tokens.extend(self.sounds.iter().map(|value| FilterToken::Sound(*value)));
        tokens.extend(self.tags.iter().map(|value| FilterToken::Tag(*value)));
        tokens.extend(self.captive.iter().map(|value| FilterToken::Captive(*value)));
        tokens.extend(self.quality.iter().map(|value| FilterToken::Quality(*value)));
        if self.small {
            tokens.push(FilterToken::Small);
        }
        if self.black_and_white {
            tokens.push(FilterToken::BlackAndWhite);
        }
        tokens
    }

    /// Parses free text into filters, starting from the defaults.
    ///
    /// Tokens are split on commas when any are present, otherwise on spaces.
    /// Unknown tokens are ignored.
    pub fn parse(text: &str) -> Self {
        let mut filters = Self::default();
        let lowered = text.trim().to_lowercase();
        let separator = if lowered.contains(',') { ',' } else { ' ' };
        for token in lowered.split(separator).map(str::trim) {
            if token.is_empty() {
                continue;
            }
            if let Some(resolved) = FilterToken::resolve_alias(token) {
                filters.insert(resolved);
            }
        }
        filters
    }

    pub fn to_int(&self) -> i64 {
        self.tokens()
            .into_iter()
            .fold(0i64, |acc, token| acc | (1i64 << (token.bit() - 1)))
    }

    pub fn from_int(value: i64) -> Result<Self, MediaError> {
        if !(0..FILTER_INT_LIMIT).contains(&value) {
            return Err(MediaError::OutOfRange(value));
        }
        let mut filters = Self::empty();
        for bit in 1..=FILTER_BITS {
            if value & (1i64 << (bit - 1)) == 0 {
                continue;
            }
            if let Some(token) = FilterToken::from_bit(bit) {
                filters.insert(token);
            }
        }
        Ok(filters)
    }

    /// Toggles the options set in `value`.
    pub fn xor(&self, value: i64) -> Result<Self, MediaError> {
        if !(0..FILTER_INT_LIMIT).contains(&value) {
            return Err(MediaError::OutOfRange(value));
        }
        Self::from_int(value ^ self.to_int())
    }

    /// Builds the catalog search URL for these filters.
    pub fn build_query(
        &self,
        catalog_url: &str,
        taxon_code: &str,
        kind: MediaKind,
        page_size: usize,
        cursor: &str,
    ) -> String {
        let mut url = format!(
            "{catalog_url}&taxonCode={}&mediaType={}&count={page_size}",
            urlencoding::encode(taxon_code),
            kind.catalog_code()
        );
        for token in self.tokens() {
            let dimension = token.dimension();
            let suppressed = match dimension {
                FilterDimension::Sounds => kind == MediaKind::Image,
                FilterDimension::Tags => kind == MediaKind::Song,
                _ => false,
            };
            if suppressed {
                continue;
            }
            let param = match token {
                // upstream files these two sound types under photo tags
                FilterToken::Sound(Sound::Environmental | Sound::People) => {
                    FilterDimension::Tags.query_param()
                }
                _ => dimension.query_param(),
            };
            let Some(param) = param else {
                continue;
            };
            let code = match token {
                FilterToken::Age(value) => value.code(),
                FilterToken::Sex(value) => value.code(),
                FilterToken::Behavior(value) => value.code(),
                FilterToken::Breeding(value) => value.code(),
                FilterToken::Sound(value) => value.code(),
                FilterToken::Tag(value) => value.code(),
                FilterToken::Captive(value) => value.code(),
                FilterToken::Quality(value) => value.code(),
                FilterToken::Small | FilterToken::BlackAndWhite => continue,
            };
            url.push_str(&format!("&{param}={code}"));
        }
        url.push_str(&format!("&cursorMark={}", urlencoding::encode(cursor)));
        url
    }

    /// One `dimension: label` line per active option.
    pub fn display(&self) -> Vec<String> {
        self.tokens()
            .into_iter()
            .map(|token| format!("{}: {}", token.dimension().name(), token.label()))
            .collect()
    }
}
