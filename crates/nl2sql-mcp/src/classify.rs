use nl2sql_core::ExecutionErrorKind;
use regex::Regex;
use std::sync::OnceLock;

struct Rule {
    kind: ExecutionErrorKind,
    pattern: Regex,
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let table: &[(ExecutionErrorKind, &str)] = &[
            // Query timeouts and serialization failures (HYT00, HYT01, 40001).
            (
                ExecutionErrorKind::Timeout,
                r"(?i)\b(HYT00|HYT01|40001)\b|time[d ]?\s?out|timeout expired|query (was )?cancel+ed|deadlock",
            ),
            // Link failures (08S01, 08001, 08007).
            (
                ExecutionErrorKind::Connectivity,
                r"(?i)\b(08S01|08001|08007)\b|communication link|connection (refused|reset|closed|failure|lost)|could not connect|unable to connect|network|server (is )?unavailable|login failed",
            ),
            (
                ExecutionErrorKind::Permission,
                r"(?i)permission denied|access denied|not authori[sz]ed|\bdenied\b|insufficient privileges?|\b42501\b",
            ),
            (
                ExecutionErrorKind::Syntax,
                r"(?i)syntax|invalid (column|object) name|unknown column|no such (column|table)|does not exist|ambiguous column|could not be bound|\b42S(02|22|01)\b|\b42000\b|\b42P01\b|\b42703\b|near \S+:|must appear in the group by|not contained in either an aggregate",
            ),
        ];
        table
            .iter()
            .filter_map(|(kind, pattern)| {
                Regex::new(pattern).ok().map(|pattern| Rule {
                    kind: *kind,
                    pattern,
                })
            })
            .collect()
    })
}

/// Map a raw database error message to an execution error class.
///
/// Rules are tried in order; the first match wins.
pub fn classify_execution_error(message: &str) -> ExecutionErrorKind {
    rules()
        .iter()
        .find(|rule| rule.pattern.is_match(message))
        .map(|rule| rule.kind)
        .unwrap_or(ExecutionErrorKind::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_server_messages() {
        assert_eq!(
            classify_execution_error("[42S22] Invalid column name 'population_2050'."),
            ExecutionErrorKind::Syntax
        );
        assert_eq!(
            classify_execution_error("[HYT00] Query timeout expired"),
            ExecutionErrorKind::Timeout
        );
        assert_eq!(
            classify_execution_error("[08S01] Communication link failure"),
            ExecutionErrorKind::Connectivity
        );
        assert_eq!(
            classify_execution_error("The SELECT permission was denied on the object 'gdp'"),
            ExecutionErrorKind::Permission
        );
    }

    #[test]
    fn test_generic_messages() {
        assert_eq!(
            classify_execution_error("ERROR: column \"foo\" does not exist"),
            ExecutionErrorKind::Syntax
        );
        assert_eq!(
            classify_execution_error("near \"FROMM\": syntax error"),
            ExecutionErrorKind::Syntax
        );
        assert_eq!(
            classify_execution_error("disk full"),
            ExecutionErrorKind::Other
        );
    }
}
