//! MQTT topic matching with `+` and `#` wildcards

/// Single-level wildcard segment
pub const SINGLE_LEVEL: &str = "+";
/// Multi-level wildcard segment, only valid as the final segment
pub const MULTI_LEVEL: &str = "#";

/// Returns true when `topic` satisfies the subscription `pattern`.
///
/// Exact string equality always matches. Otherwise both sides are split on
/// `/`: `+` consumes exactly one topic segment, a trailing `#` consumes the
/// remaining segments (zero or more) and literal segments must be equal.
/// There is no prefix matching, so `sensor/1` does not match `sensor/12`.
pub fn matches(topic: &str, pattern: &str) -> bool {
    if topic == pattern {
        return true;
    }

    let mut topic_segments = topic.split('/');
    let mut pattern_segments = pattern.split('/').peekable();

    while let Some(segment) = pattern_segments.next() {
        if segment == MULTI_LEVEL {
            // `#` anywhere but the end is malformed
            return pattern_segments.peek().is_none();
        }

        let Some(topic_segment) = topic_segments.next() else {
            return false;
        };

        if segment != SINGLE_LEVEL && segment != topic_segment {
            return false;
        }
    }

    topic_segments.next().is_none()
}

/// True when the pattern contains a wildcard segment
pub fn is_wildcard(pattern: &str) -> bool {
    pattern
        .split('/')
        .any(|segment| segment == SINGLE_LEVEL || segment == MULTI_LEVEL)
}

/// Last `/`-delimited segment of a topic
pub fn trailing_segment(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_patterns_match_only_equal_topics() {
        let cases = [
            ("a/b/c", "a/b/c", true),
            ("a/b/c", "a/b/d", false),
            ("sensor/1", "sensor/12", false),
            ("sensor/12", "sensor/1", false),
            ("a/b", "a/b/c", false),
            ("a/b/c", "a/b", false),
            ("", "", true),
        ];
        for (topic, pattern, expected) in cases {
            assert_eq!(matches(topic, pattern), expected, "{topic} vs {pattern}");
            assert_eq!(matches(topic, pattern), topic == pattern);
        }
    }

    #[test]
    fn single_level_wildcard_needs_same_depth() {
        assert!(matches("a/5/c", "a/+/c"));
        assert!(!matches("a/5/6/c", "a/+/c"));
        assert!(!matches("a/c", "a/+/c"));
        assert!(!matches("b/5/c", "a/+/c"));
        assert!(matches("selfmon/vmod.1/prio/outputs/9", "selfmon/vmod.1/prio/outputs/+"));
        assert!(!matches("selfmon/vmod.1/prio/outputs", "selfmon/vmod.1/prio/outputs/+"));
    }

    #[test]
    fn multi_level_wildcard_matches_remaining_segments() {
        let pattern = "a/b/#";
        assert!(matches("a/b", pattern));
        assert!(matches("a/b/c", pattern));
        assert!(matches("a/b/c/d", pattern));
        assert!(!matches("a/x", pattern));
        assert!(!matches("a", pattern));
        assert!(matches("anything/at/all", "#"));
    }

    #[test]
    fn misplaced_multi_level_wildcard_never_matches() {
        assert!(!matches("a/b/c", "a/#/c"));
        assert!(matches("a/#/c", "a/#/c"));
    }

    #[test]
    fn wildcard_helpers() {
        assert!(is_wildcard("a/+/c"));
        assert!(is_wildcard("a/#"));
        assert!(!is_wildcard("a/b+/c"));
        assert_eq!(trailing_segment("selfmon/vmod.7/sia4/groups/12"), "12");
        assert_eq!(trailing_segment("plain"), "plain");
    }
}
