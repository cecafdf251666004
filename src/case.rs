//! Case conversion for declared field names: CamelCase -> snake_case (wire and column names).

/// Convert a single identifier from CamelCase/camelCase to snake_case.
/// Runs of capitals are kept together as one word.
/// e.g. "OwnerId" -> "owner_id", "createdAt" -> "created_at", "UserID" -> "user_id", "HTTPCode" -> "http_code"
pub fn to_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 && !out.ends_with('_') {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).map(|n| n.is_lowercase()).unwrap_or(false);
                if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
                    out.push('_');
                }
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
