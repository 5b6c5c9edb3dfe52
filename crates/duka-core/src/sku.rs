//! # SKU Derivation
//!
//! A specification's SKU is derived once from its attributes and never
//! changes afterward.
//!
//! ```text
//! brand "Samsung", category "Phones", color "Black"
//!          │               │              │
//!         SAM             PH             BLA      →  SAM-PH-BLA
//!
//! taken?  SAM-PH-BLA-01 … SAM-PH-BLA-09  →  SAM-PH-BLA-3F9A0C
//! ```

/// Numbered candidates tried before falling back to a random suffix.
pub const MAX_NUMBERED_CANDIDATES: u32 = 9;

fn segment(value: &str, len: usize, fallback: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(len)
        .collect::<String>()
        .to_ascii_uppercase();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

/// `BRA-CA-COL` from the first letters of brand, category and color.
pub fn sku_base(brand: &str, category: &str, color: &str) -> String {
    format!(
        "{}-{}-{}",
        segment(brand, 3, "PROD"),
        segment(category, 2, "CAT"),
        segment(color, 3, "CLR")
    )
}

/// `BASE-01` .. `BASE-09`.
pub fn numbered_candidate(base: &str, n: u32) -> String {
    format!("{}-{:02}", base, n)
}

/// `BASE-XXXXXX` with the low 24 bits of `entropy` as uppercase hex.
pub fn suffixed_candidate(base: &str, entropy: u32) -> String {
    format!("{}-{:06X}", base, entropy & 0x00FF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_from_attributes() {
        assert_eq!(sku_base("Samsung", "Phones", "Black"), "SAM-PH-BLA");
        assert_eq!(sku_base("lg", "tv", "red"), "LG-TV-RED");
    }

    #[test]
    fn test_empty_attributes_use_defaults() {
        assert_eq!(sku_base("", "  ", "--"), "PROD-CAT-CLR");
    }

    #[test]
    fn test_candidates() {
        assert_eq!(numbered_candidate("SAM-PH-BLA", 3), "SAM-PH-BLA-03");
        assert_eq!(suffixed_candidate("SAM-PH-BLA", 0xAB3F9A0C), "SAM-PH-BLA-3F9A0C");
    }
}
