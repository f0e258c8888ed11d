//! Input validation for names, lobby settings and chat

/// Shortest accepted player or lobby name
pub const NAME_MIN_LEN: usize = 3;
/// Longest accepted player or lobby name
pub const NAME_MAX_LEN: usize = 10;
/// Smallest lobby
pub const MIN_CAPACITY: u8 = 2;
/// Largest lobby
pub const MAX_CAPACITY: u8 = 4;
/// Longest chat payload in characters
pub const CHAT_MAX_LEN: usize = 1024;

fn is_separator(c: char) -> bool {
    c == '_' || c == '-'
}

/// Player name rule: 3 to 10 characters from `[A-Za-z0-9_-]`, with at
/// most one separator (`_` or `-`) in the whole name.
pub fn is_valid_name(name: &str) -> bool {
    let len = name.chars().count();
    if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len) {
        return false;
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || is_separator(c))
    {
        return false;
    }
    name.chars().filter(|c| is_separator(*c)).count() < 2
}

/// Lobby names follow the player name rule
pub fn is_valid_lobby_name(name: &str) -> bool {
    is_valid_name(name)
}

pub fn is_valid_capacity(capacity: i64) -> bool {
    (i64::from(MIN_CAPACITY)..=i64::from(MAX_CAPACITY)).contains(&capacity)
}

/// Chat text: 1 to 1024 ASCII characters
pub fn is_valid_chat(text: &str) -> bool {
    !text.is_empty() && text.len() <= CHAT_MAX_LEN && text.is_ascii()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_length_bounds() {
        assert!(!is_valid_name("ab"));
        assert!(is_valid_name("abc"));
        assert!(is_valid_name("abcdefghij"));
        assert!(!is_valid_name("abcdefghijk"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn test_name_separators() {
        assert!(is_valid_name("a_b"));
        assert!(is_valid_name("a-bc"));
        assert!(is_valid_name("_ab"));
        assert!(!is_valid_name("a--b"));
        assert!(!is_valid_name("a-b_c"));
        assert!(!is_valid_name("a__"));
    }

    #[test]
    fn test_name_charset() {
        assert!(!is_valid_name("abc d"));
        assert!(!is_valid_name("abc!"));
        assert!(!is_valid_name("àbcd"));
        assert!(is_valid_name("Player42"));
    }

    #[test]
    fn test_lobby_name_follows_player_rule() {
        assert!(is_valid_lobby_name("table_1"));
        assert!(!is_valid_lobby_name("t1"));
    }

    #[test]
    fn test_capacity_bounds() {
        assert!(!is_valid_capacity(1));
        assert!(is_valid_capacity(2));
        assert!(is_valid_capacity(3));
        assert!(is_valid_capacity(4));
        assert!(!is_valid_capacity(5));
        assert!(!is_valid_capacity(-2));
    }

    #[test]
    fn test_chat_bounds() {
        assert!(!is_valid_chat(""));
        assert!(is_valid_chat("x"));
        assert!(is_valid_chat(&"x".repeat(1024)));
        assert!(!is_valid_chat(&"x".repeat(1025)));
        assert!(!is_valid_chat("héllo"));
    }
}
