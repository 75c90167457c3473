use common::domain::Eui64;

/// Vendor tag marker printed before the address on device labels
const TAG_MARKER: &str = "TN";

/// Address assumed when a query is empty after stripping the tag marker
pub const DEFAULT_TAG: Eui64 = Eui64::new(0x58A0_CB00_0020_0000);

const ADDRESS_DIGITS: usize = 16;
const MAX_HYPHENATED_SUFFIX: usize = 21;

/// What a free-form device query resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    /// Exact address lookup
    Address(Eui64),
    /// Trailing part of the canonical address, already hyphenated
    Suffix(String),
}

/// Normalize a user query (label scan, partial or full address) to a [`SearchKey`]
///
/// Returns `None` when the query cannot name any address.
pub fn search_key(query: &str) -> Option<SearchKey> {
    let upper = query.trim().to_uppercase();
    let stripped = match upper.rfind(TAG_MARKER) {
        Some(at) => &upper[at + TAG_MARKER.len()..],
        None => upper.as_str(),
    };
    let len = stripped.len();
    let hyphenated = stripped.contains('-');

    if len == ADDRESS_DIGITS && !hyphenated {
        Eui64::parse(stripped).ok().map(SearchKey::Address)
    } else if len == 0 {
        Some(SearchKey::Address(DEFAULT_TAG))
    } else if len < ADDRESS_DIGITS && !hyphenated {
        Some(SearchKey::Suffix(hyphenate_suffix(stripped)))
    } else if len < MAX_HYPHENATED_SUFFIX && hyphenated {
        Some(SearchKey::Suffix(hyphenate_suffix(&stripped.replace('-', ""))))
    } else {
        Eui64::parse(stripped).ok().map(SearchKey::Address)
    }
}

/// Group hex digits into pairs aligned to the end of the address
///
/// `"007B9"` becomes `"0-07-B9"`, which matches the tail of
/// `"58-A0-CB-00-00-20-07-B9"`.
pub fn hyphenate_suffix(digits: &str) -> String {
    let reversed: Vec<char> = digits.chars().rev().collect();
    let grouped: Vec<String> = reversed
        .chunks(2)
        .map(|pair| pair.iter().collect())
        .collect();
    grouped.join("-").chars().rev().collect()
}
