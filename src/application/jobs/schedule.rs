use std::str::FromStr;

use apalis_cron::Schedule;

/// Parses a six-field cron expression (seconds first).
pub fn parse_schedule(expression: &str) -> Result<Schedule, String> {
    Schedule::from_str(expression).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_expressions_parse() {
        for expression in ["0 */15 * * * *", "0 */30 * * * *"] {
            let schedule = parse_schedule(expression).expect("valid cron");
            let upcoming: Vec<_> = schedule.upcoming(chrono::Utc).take(3).collect();
            assert_eq!(upcoming.len(), 3);
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_schedule("every quarter hour").is_err());
    }
}
