//! POSIX `time -p` report scraper

use lazy_regex::regex_captures;

use super::ToolAnomaly;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingReport {
    /// User CPU seconds
    pub user_secs: f64,
}

pub fn scrape_timing_report(log: &str) -> Result<TimingReport, ToolAnomaly> {
    let (_, user) = regex_captures!(r"(?s)real.*user\s+(\d+\.\d+).*sys", log)
        .ok_or(ToolAnomaly::MalformedTimingReport)?;
    let user_secs = user
        .parse()
        .map_err(|_| ToolAnomaly::MalformedTimingReport)?;
    Ok(TimingReport { user_secs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrape_user_time() {
        let log = include_str!("../../tests/fixtures/time_report.log");
        assert_eq!(scrape_timing_report(log).unwrap().user_secs, 0.61);
    }

    #[test]
    fn test_truncated_report_is_anomaly() {
        let log = include_str!("../../tests/fixtures/time_truncated.log");
        assert_eq!(
            scrape_timing_report(log),
            Err(ToolAnomaly::MalformedTimingReport)
        );
        assert!(scrape_timing_report("").is_err());
    }
}
