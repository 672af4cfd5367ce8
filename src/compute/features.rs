//! Feature extraction: label -> fixed-schema numeric vector.
//!
//! Every family is a pure function of the label. Components are always
//! emitted in schema order and clamped to their declared range; components
//! that do not apply to a label (no letters, no words) are 0.

use std::collections::HashMap;
use std::sync::Arc;

use crate::schema::{ComponentSpec, FamilyId, FeatureSchema};

/// Ordered feature components of one label under one family.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    schema: FeatureSchema,
    values: Vec<f64>,
}

impl FeatureVector {
    /// Build from raw values, enforcing schema length and ranges.
    pub fn from_raw(schema: FeatureSchema, mut values: Vec<f64>) -> Self {
        values.resize(schema.len(), 0.0);
        for (value, spec) in values.iter_mut().zip(schema.components) {
            *value = spec.clamp(*value);
        }
        Self { schema, values }
    }

    #[inline]
    pub fn family(&self) -> FamilyId {
        self.schema.family
    }

    #[inline]
    pub fn schema(&self) -> FeatureSchema {
        self.schema
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of a named component.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema
            .components
            .iter()
            .position(|c| c.name == name)
            .map(|i| self.values[i])
    }

    /// `(name, value)` pairs in schema order.
    pub fn components(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.schema
            .components
            .iter()
            .zip(&self.values)
            .map(|(spec, &v)| (spec.name, v))
    }

    /// Components mapped to [0, 1] by their schema ranges.
    pub fn normalized(&self) -> Vec<f64> {
        self.schema
            .components
            .iter()
            .zip(&self.values)
            .map(|(spec, &v)| spec.normalize(v))
            .collect()
    }
}

/// A named set of extraction rules.
pub trait FeatureExtractor: Send + Sync {
    /// Schema this extractor fills.
    fn schema(&self) -> FeatureSchema;

    /// Raw component values in schema order.
    fn extract_raw(&self, label: &str) -> Vec<f64>;

    fn family(&self) -> FamilyId {
        self.schema().family
    }

    /// Extract a vector that always matches the schema.
    fn extract(&self, label: &str) -> FeatureVector {
        FeatureVector::from_raw(self.schema(), self.extract_raw(label))
    }
}

/// Extract with a built-in family.
pub fn extract(label: &str, family: FamilyId) -> FeatureVector {
    match family {
        FamilyId::Phonetic => PhoneticExtractor.extract(label),
        FamilyId::Semantic => SemanticExtractor.extract(label),
        FamilyId::Structural => StructuralExtractor.extract(label),
        FamilyId::Frequency => FrequencyExtractor.extract(label),
        FamilyId::Numerological => NumerologicalExtractor.extract(label),
        FamilyId::Hybrid => HybridExtractor.extract(label),
    }
}

/// Schema of a built-in family.
pub fn schema_of(family: FamilyId) -> FeatureSchema {
    match family {
        FamilyId::Phonetic => PhoneticExtractor.schema(),
        FamilyId::Semantic => SemanticExtractor.schema(),
        FamilyId::Structural => StructuralExtractor.schema(),
        FamilyId::Frequency => FrequencyExtractor.schema(),
        FamilyId::Numerological => NumerologicalExtractor.schema(),
        FamilyId::Hybrid => HybridExtractor.schema(),
    }
}

/// Table of extractors resolved once at startup.
#[derive(Clone)]
pub struct FamilyRegistry {
    extractors: HashMap<FamilyId, Arc<dyn FeatureExtractor>>,
}

impl FamilyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Registry with all six built-in families.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PhoneticExtractor));
        registry.register(Arc::new(SemanticExtractor));
        registry.register(Arc::new(StructuralExtractor));
        registry.register(Arc::new(FrequencyExtractor));
        registry.register(Arc::new(NumerologicalExtractor));
        registry.register(Arc::new(HybridExtractor));
        registry
    }

    /// Register an extractor, replacing any previous one for its family.
    pub fn register(&mut self, extractor: Arc<dyn FeatureExtractor>) {
        self.extractors.insert(extractor.family(), extractor);
    }

    pub fn get(&self, family: FamilyId) -> Option<Arc<dyn FeatureExtractor>> {
        self.extractors.get(&family).cloned()
    }

    pub fn contains(&self, family: FamilyId) -> bool {
        self.extractors.contains_key(&family)
    }

    /// Registered families in index order.
    pub fn families(&self) -> Vec<FamilyId> {
        let mut families: Vec<_> = self.extractors.keys().copied().collect();
        families.sort();
        families
    }
}

impl Default for FamilyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for FamilyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FamilyRegistry")
            .field("families", &self.families())
            .finish()
    }
}

// ============================================================================
// Label helpers
// ============================================================================

const VOWELS: &str = "aeiou";
const PLOSIVES: &str = "pbtdkgcq";
const FRICATIVES: &str = "fvszhxj";
const NASALS: &str = "mn";
const LIQUIDS: &str = "lrwy";
const HARD: &str = "ktpgdbxz";
const SOFT: &str = "lmnswfvh";
const RARE: &str = "jqxz";

const TITLE_WORDS: &[&str] = &[
    "king", "queen", "lord", "lady", "sir", "saint", "st", "dr", "duke", "prince", "princess",
    "captain", "royal", "grand", "great", "master",
];

const POWER_WORDS: &[&str] = &[
    "power", "strike", "storm", "thunder", "iron", "steel", "fire", "dragon", "victory", "gold",
    "star", "titan", "blade", "war", "force", "lion", "wolf", "eagle", "hawk", "bull",
];

const COMMON_BIGRAMS: &[&str] = &[
    "th", "he", "in", "er", "an", "re", "on", "at", "en", "nd", "ti", "es", "or", "te", "of",
    "ed", "is", "it", "al", "ar",
];

/// Relative frequency of each letter in English text, a..z.
const ENGLISH_FREQUENCY: [f64; 26] = [
    0.0817, 0.0149, 0.0278, 0.0425, 0.1270, 0.0223, 0.0202, 0.0609, 0.0697, 0.0015, 0.0077,
    0.0403, 0.0241, 0.0675, 0.0751, 0.0193, 0.0010, 0.0599, 0.0633, 0.0906, 0.0276, 0.0098,
    0.0236, 0.0015, 0.0197, 0.0007,
];

/// Chaldean letter values, a..z.
const CHALDEAN: [u32; 26] = [
    1, 2, 3, 4, 5, 8, 3, 5, 1, 1, 2, 3, 4, 5, 7, 8, 1, 2, 3, 4, 6, 6, 6, 5, 1, 7,
];

/// Lowercase ASCII letters of a label, in order.
fn ascii_letters(label: &str) -> Vec<u8> {
    label
        .bytes()
        .filter(u8::is_ascii_alphabetic)
        .map(|b| b.to_ascii_lowercase())
        .collect()
}

/// Lowercased alphanumeric words.
fn words(label: &str) -> Vec<String> {
    label
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[inline]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[inline]
fn count_in(letters: &[u8], set: &str) -> usize {
    letters.iter().filter(|b| set.as_bytes().contains(b)).count()
}

#[inline]
fn is_vowel(b: u8) -> bool {
    VOWELS.as_bytes().contains(&b)
}

/// Digital root that keeps master numbers 11, 22 and 33.
fn reduce_number(mut n: u32) -> u32 {
    while n > 9 && !matches!(n, 11 | 22 | 33) {
        n = digit_sum(n);
    }
    n
}

fn digit_sum(mut n: u32) -> u32 {
    let mut sum = 0;
    while n > 0 {
        sum += n % 10;
        n /= 10;
    }
    sum
}

#[inline]
fn pythagorean_value(b: u8) -> u32 {
    u32::from(b - b'a') % 9 + 1
}

// ============================================================================
// Phonetic
// ============================================================================

const PHONETIC: &[ComponentSpec] = &[
    ComponentSpec::new("vowel_ratio", 0.0, 1.0),
    ComponentSpec::new("plosive_ratio", 0.0, 1.0),
    ComponentSpec::new("fricative_ratio", 0.0, 1.0),
    ComponentSpec::new("nasal_ratio", 0.0, 1.0),
    ComponentSpec::new("liquid_ratio", 0.0, 1.0),
    ComponentSpec::new("max_consonant_cluster", 0.0, 8.0),
    ComponentSpec::new("syllable_estimate", 0.0, 12.0),
    ComponentSpec::new("alliteration", 0.0, 1.0),
];

/// Sound-pattern features.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhoneticExtractor;

impl FeatureExtractor for PhoneticExtractor {
    fn schema(&self) -> FeatureSchema {
        FeatureSchema {
            family: FamilyId::Phonetic,
            components: PHONETIC,
        }
    }

    fn extract_raw(&self, label: &str) -> Vec<f64> {
        let letters = ascii_letters(label);
        let n = letters.len();

        let mut max_cluster = 0usize;
        let mut cluster = 0usize;
        for &b in &letters {
            if is_vowel(b) {
                cluster = 0;
            } else {
                cluster += 1;
                max_cluster = max_cluster.max(cluster);
            }
        }

        let words = words(label);
        let syllables: usize = words
            .iter()
            .map(|w| {
                let letters = ascii_letters(w);
                if letters.is_empty() {
                    return 0;
                }
                let groups = letters
                    .iter()
                    .enumerate()
                    .filter(|&(i, &b)| is_vowel(b) && (i == 0 || !is_vowel(letters[i - 1])))
                    .count();
                groups.max(1)
            })
            .sum();

        let alliteration = if words.len() >= 2 {
            let first = words[0].chars().next();
            let shared = words[1..]
                .iter()
                .filter(|w| w.chars().next() == first)
                .count();
            ratio(shared, words.len() - 1)
        } else {
            0.0
        };

        vec![
            ratio(count_in(&letters, VOWELS), n),
            ratio(count_in(&letters, PLOSIVES), n),
            ratio(count_in(&letters, FRICATIVES), n),
            ratio(count_in(&letters, NASALS), n),
            ratio(count_in(&letters, LIQUIDS), n),
            max_cluster as f64,
            syllables as f64,
            alliteration,
        ]
    }
}

// ============================================================================
// Semantic
// ============================================================================

const SEMANTIC: &[ComponentSpec] = &[
    ComponentSpec::new("hardness", 0.0, 1.0),
    ComponentSpec::new("softness", 0.0, 1.0),
    ComponentSpec::new("word_count", 0.0, 10.0),
    ComponentSpec::new("mean_word_length", 0.0, 20.0),
    ComponentSpec::new("title_word", 0.0, 1.0),
    ComponentSpec::new("power_word_ratio", 0.0, 1.0),
    ComponentSpec::new("has_digit", 0.0, 1.0),
    ComponentSpec::new("capitalization", 0.0, 1.0),
];

/// Sound-symbolic and lexical cues.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticExtractor;

impl FeatureExtractor for SemanticExtractor {
    fn schema(&self) -> FeatureSchema {
        FeatureSchema {
            family: FamilyId::Semantic,
            components: SEMANTIC,
        }
    }

    fn extract_raw(&self, label: &str) -> Vec<f64> {
        let letters = ascii_letters(label);
        let n = letters.len();
        let words = words(label);

        let total_word_chars: usize = words.iter().map(|w| w.chars().count()).sum();
        let title = words.iter().any(|w| TITLE_WORDS.contains(&w.as_str()));
        let power = words
            .iter()
            .filter(|w| POWER_WORDS.contains(&w.as_str()))
            .count();
        let capitalized = label
            .split_whitespace()
            .filter(|w| w.chars().next().is_some_and(char::is_uppercase))
            .count();
        let raw_words = label.split_whitespace().count();

        vec![
            ratio(count_in(&letters, HARD), n),
            ratio(count_in(&letters, SOFT), n),
            words.len() as f64,
            ratio(total_word_chars, words.len()),
            if title { 1.0 } else { 0.0 },
            ratio(power, words.len()),
            if label.chars().any(|c| c.is_ascii_digit()) {
                1.0
            } else {
                0.0
            },
            ratio(capitalized, raw_words),
        ]
    }
}

// ============================================================================
// Structural
// ============================================================================

const STRUCTURAL: &[ComponentSpec] = &[
    ComponentSpec::new("length", 0.0, 64.0),
    ComponentSpec::new("word_count", 0.0, 10.0),
    ComponentSpec::new("unique_char_ratio", 0.0, 1.0),
    ComponentSpec::new("uppercase_ratio", 0.0, 1.0),
    ComponentSpec::new("digit_ratio", 0.0, 1.0),
    ComponentSpec::new("punctuation_ratio", 0.0, 1.0),
    ComponentSpec::new("symmetry", 0.0, 1.0),
    ComponentSpec::new("longest_word", 0.0, 24.0),
];

/// Shape of the string itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralExtractor;

impl FeatureExtractor for StructuralExtractor {
    fn schema(&self) -> FeatureSchema {
        FeatureSchema {
            family: FamilyId::Structural,
            components: STRUCTURAL,
        }
    }

    fn extract_raw(&self, label: &str) -> Vec<f64> {
        let chars: Vec<char> = label.chars().collect();
        let n = chars.len();

        let mut distinct = chars.clone();
        distinct.sort_unstable();
        distinct.dedup();

        let alphabetic = chars.iter().filter(|c| c.is_alphabetic()).count();
        let uppercase = chars.iter().filter(|c| c.is_uppercase()).count();
        let digits = chars.iter().filter(|c| c.is_ascii_digit()).count();
        let punctuation = chars.iter().filter(|c| c.is_ascii_punctuation()).count();

        let letters = ascii_letters(label);
        let half = letters.len() / 2;
        let mirrored = (0..half)
            .filter(|&i| letters[i] == letters[letters.len() - 1 - i])
            .count();

        let words = words(label);
        let longest = words.iter().map(|w| w.chars().count()).max().unwrap_or(0);

        vec![
            n as f64,
            words.len() as f64,
            ratio(distinct.len(), n),
            ratio(uppercase, alphabetic),
            ratio(digits, n),
            ratio(punctuation, n),
            ratio(mirrored, half),
            longest as f64,
        ]
    }
}

// ============================================================================
// Frequency
// ============================================================================

const FREQUENCY: &[ComponentSpec] = &[
    ComponentSpec::new("mean_letter_frequency", 0.0, 0.13),
    ComponentSpec::new("rare_letter_ratio", 0.0, 1.0),
    ComponentSpec::new("common_bigram_ratio", 0.0, 1.0),
    ComponentSpec::new("entropy", 0.0, 5.0),
    ComponentSpec::new("repeated_char_ratio", 0.0, 1.0),
    ComponentSpec::new("alternation", 0.0, 1.0),
];

/// Letter statistics relative to English text.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrequencyExtractor;

impl FeatureExtractor for FrequencyExtractor {
    fn schema(&self) -> FeatureSchema {
        FeatureSchema {
            family: FamilyId::Frequency,
            components: FREQUENCY,
        }
    }

    fn extract_raw(&self, label: &str) -> Vec<f64> {
        let letters = ascii_letters(label);
        let n = letters.len();

        let mean_frequency = if n == 0 {
            0.0
        } else {
            letters
                .iter()
                .map(|&b| ENGLISH_FREQUENCY[(b - b'a') as usize])
                .sum::<f64>()
                / n as f64
        };

        let mut counts = [0usize; 26];
        for &b in &letters {
            counts[(b - b'a') as usize] += 1;
        }
        let entropy = counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / n as f64;
                -p * p.log2()
            })
            .sum::<f64>();

        let pairs = n.saturating_sub(1);
        let (mut common, mut repeated, mut alternating) = (0, 0, 0);
        for window in letters.windows(2) {
            let bigram = [window[0], window[1]];
            if COMMON_BIGRAMS.iter().any(|b| b.as_bytes() == &bigram[..]) {
                common += 1;
            }
            if window[0] == window[1] {
                repeated += 1;
            }
            if is_vowel(window[0]) != is_vowel(window[1]) {
                alternating += 1;
            }
        }

        vec![
            mean_frequency,
            ratio(count_in(&letters, RARE), n),
            ratio(common, pairs),
            entropy,
            ratio(repeated, pairs),
            ratio(alternating, pairs),
        ]
    }
}

// ============================================================================
// Numerological
// ============================================================================

const NUMEROLOGICAL: &[ComponentSpec] = &[
    ComponentSpec::new("expression", 0.0, 33.0),
    ComponentSpec::new("soul_urge", 0.0, 33.0),
    ComponentSpec::new("personality", 0.0, 33.0),
    ComponentSpec::new("master_number", 0.0, 1.0),
    ComponentSpec::new("chaldean", 0.0, 33.0),
    ComponentSpec::new("length_number", 0.0, 9.0),
];

/// Letter-value reductions in the numerology tradition.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumerologicalExtractor;

impl FeatureExtractor for NumerologicalExtractor {
    fn schema(&self) -> FeatureSchema {
        FeatureSchema {
            family: FamilyId::Numerological,
            components: NUMEROLOGICAL,
        }
    }

    fn extract_raw(&self, label: &str) -> Vec<f64> {
        let letters = ascii_letters(label);

        let total: u32 = letters.iter().map(|&b| pythagorean_value(b)).sum();
        let vowels: u32 = letters
            .iter()
            .filter(|&&b| is_vowel(b))
            .map(|&b| pythagorean_value(b))
            .sum();
        let chaldean: u32 = letters
            .iter()
            .map(|&b| CHALDEAN[(b - b'a') as usize])
            .sum();

        let expression = reduce_number(total);
        let length = letters.len() as u32;
        let length_number = if length == 0 { 0 } else { (length - 1) % 9 + 1 };

        vec![
            expression as f64,
            reduce_number(vowels) as f64,
            reduce_number(total - vowels) as f64,
            if matches!(expression, 11 | 22 | 33) {
                1.0
            } else {
                0.0
            },
            reduce_number(chaldean) as f64,
            length_number as f64,
        ]
    }
}

// ============================================================================
// Hybrid
// ============================================================================

const HYBRID: &[ComponentSpec] = &[
    ComponentSpec::new("phonetic_vowel_ratio", 0.0, 1.0),
    ComponentSpec::new("phonetic_plosive_ratio", 0.0, 1.0),
    ComponentSpec::new("semantic_hardness", 0.0, 1.0),
    ComponentSpec::new("semantic_softness", 0.0, 1.0),
    ComponentSpec::new("structural_length", 0.0, 64.0),
    ComponentSpec::new("structural_word_count", 0.0, 10.0),
    ComponentSpec::new("frequency_mean_letter_frequency", 0.0, 0.13),
    ComponentSpec::new("frequency_rare_letter_ratio", 0.0, 1.0),
    ComponentSpec::new("numerological_expression", 0.0, 33.0),
    ComponentSpec::new("numerological_soul_urge", 0.0, 33.0),
];

/// Blend of the first two components of each other family.
#[derive(Debug, Clone, Copy, Default)]
pub struct HybridExtractor;

impl FeatureExtractor for HybridExtractor {
    fn schema(&self) -> FeatureSchema {
        FeatureSchema {
            family: FamilyId::Hybrid,
            components: HYBRID,
        }
    }

    fn extract_raw(&self, label: &str) -> Vec<f64> {
        let parts: [Vec<f64>; 5] = [
            PhoneticExtractor.extract(label).values,
            SemanticExtractor.extract(label).values,
            StructuralExtractor.extract(label).values,
            FrequencyExtractor.extract(label).values,
            NumerologicalExtractor.extract(label).values,
        ];
        parts
            .iter()
            .flat_map(|values| values.iter().take(2).copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_schema_lengths() {
        for family in FamilyId::ALL {
            let vector = extract("Golden Eagle", family);
            assert_eq!(vector.len(), schema_of(family).len());
            assert_eq!(vector.family(), family);
        }
        assert_eq!(schema_of(FamilyId::Hybrid).len(), 10);
    }

    #[test]
    fn test_empty_label_is_neutral() {
        for family in FamilyId::ALL {
            let vector = extract("", family);
            assert!(vector.values().iter().all(|&v| v == 0.0), "{family}");
        }
    }

    #[test]
    fn test_phonetic_components() {
        let vector = extract("Peter Piper", FamilyId::Phonetic);
        assert_eq!(vector.get("alliteration"), Some(1.0));
        assert_eq!(vector.get("syllable_estimate"), Some(4.0));
        let vowels = vector.get("vowel_ratio").unwrap();
        assert!((vowels - 4.0 / 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_structural_symmetry() {
        let palindrome = extract("Racecar", FamilyId::Structural);
        assert_eq!(palindrome.get("symmetry"), Some(1.0));
        assert_eq!(palindrome.get("length"), Some(7.0));
        assert_eq!(palindrome.get("uppercase_ratio"), Some(1.0 / 7.0));
    }

    #[test]
    fn test_numerology_reduction() {
        assert_eq!(reduce_number(38), 11);
        assert_eq!(reduce_number(47), 11);
        assert_eq!(reduce_number(99), 9);
        assert_eq!(reduce_number(0), 0);

        // a=1 b=2 c=3: 6
        let vector = extract("abc", FamilyId::Numerological);
        assert_eq!(vector.get("expression"), Some(6.0));
        assert_eq!(vector.get("soul_urge"), Some(1.0));
        assert_eq!(vector.get("personality"), Some(5.0));
        assert_eq!(vector.get("length_number"), Some(3.0));
    }

    #[test]
    fn test_hybrid_blends_families() {
        let label = "Thunder Road";
        let hybrid = extract(label, FamilyId::Hybrid);
        let phonetic = extract(label, FamilyId::Phonetic);
        let numerological = extract(label, FamilyId::Numerological);
        assert_eq!(hybrid.values()[0], phonetic.values()[0]);
        assert_eq!(hybrid.values()[9], numerological.values()[1]);
    }

    #[test]
    fn test_registry_builtin() {
        let registry = FamilyRegistry::builtin();
        assert_eq!(registry.families(), FamilyId::ALL.to_vec());
        let extractor = registry.get(FamilyId::Frequency).unwrap();
        assert_eq!(extractor.extract("zzz"), extract("zzz", FamilyId::Frequency));
    }

    #[test]
    fn test_short_raw_vectors_are_padded() {
        let schema = schema_of(FamilyId::Phonetic);
        let vector = FeatureVector::from_raw(schema, vec![0.5, 2.0]);
        assert_eq!(vector.len(), schema.len());
        assert_eq!(vector.values()[1], 1.0);
        assert_eq!(vector.values()[7], 0.0);
    }

    proptest! {
        #[test]
        fn prop_extract_is_total_and_deterministic(label in ".{0,40}") {
            for family in FamilyId::ALL {
                let a = extract(&label, family);
                let b = extract(&label, family);
                prop_assert_eq!(&a, &b);
                prop_assert_eq!(a.len(), schema_of(family).len());
                for (value, spec) in a.values().iter().zip(a.schema().components) {
                    prop_assert!(value.is_finite());
                    prop_assert!(*value >= spec.min && *value <= spec.max);
                }
            }
        }
    }
}
