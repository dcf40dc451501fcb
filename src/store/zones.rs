use crate::models::Zone;
use regex::Regex;

/// Glob-pattern-bounded ownership over subsets of the repository.
/// `owner_of` is order-sensitive — first match wins, so more specific
/// patterns must be listed before more general ones.
pub struct ZoneManager {
    zones: Vec<Zone>,
}

impl ZoneManager {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self { zones }
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn owner_of(&self, path: &str) -> Option<&str> {
        self.zones
            .iter()
            .find(|z| glob_matches(&z.pattern, path))
            .and_then(|z| z.owner.as_deref())
    }

    /// Denied if any matching zone is readonly, or if any matching zone
    /// is owned by someone other than `agent`.
    pub fn can_modify(&self, path: &str, agent: &str) -> bool {
        for zone in self.zones.iter().filter(|z| glob_matches(&z.pattern, path)) {
            if zone.readonly {
                return false;
            }
            if let Some(owner) = &zone.owner {
                if owner != agent {
                    return false;
                }
            }
        }
        true
    }
}

/// Translates a zone glob into an anchored regex: `**` matches any path
/// segments, `*` matches any run of non-slash characters, `?` matches a
/// single character. This translation is literal and must match exactly
/// for zone-ordering tests to pass.
fn glob_to_regex(pattern: &str) -> Regex {
    let mut regex = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    regex.push_str(".*");
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push('.'),
            '.' | '+' | '(' | ')' | '|' | '^' | '$' | '[' | ']' | '{' | '}' | '\\' => {
                regex.push('\\');
                regex.push(c);
            }
            other => regex.push(other),
        }
    }
    regex.push('$');
    Regex::new(&regex).unwrap_or_else(|_| Regex::new("^$").unwrap())
}

fn glob_matches(pattern: &str, path: &str) -> bool {
    glob_to_regex(pattern).is_match(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(pattern: &str, owner: Option<&str>, readonly: bool) -> Zone {
        Zone {
            pattern: pattern.to_string(),
            owner: owner.map(|s| s.to_string()),
            readonly,
        }
    }

    #[test]
    fn zone_enforcement_blocks_other_owners_and_readonly() {
        let manager = ZoneManager::new(vec![
            zone("src/auth/**", Some("claude"), false),
            zone("src/config/**", None, true),
        ]);

        assert!(!manager.can_modify("src/auth/login.ts", "gemini"));
        assert!(!manager.can_modify("src/config/x.ts", "claude"));
        assert!(manager.can_modify("src/utils.ts", "anyone"));
        assert!(manager.can_modify("src/auth/login.ts", "claude"));
    }

    #[test]
    fn owner_of_is_first_match_wins() {
        let manager = ZoneManager::new(vec![
            zone("src/auth/admin/**", Some("lead"), false),
            zone("src/auth/**", Some("claude"), false),
        ]);
        assert_eq!(manager.owner_of("src/auth/admin/panel.ts"), Some("lead"));
        assert_eq!(manager.owner_of("src/auth/login.ts"), Some("claude"));
    }

    #[test]
    fn single_star_does_not_cross_slash() {
        let manager = ZoneManager::new(vec![zone("src/*.ts", Some("x"), false)]);
        assert!(manager.can_modify("src/other/deep.ts", "anyone"));
        assert!(!manager.can_modify("src/top.ts", "y"));
    }
}
