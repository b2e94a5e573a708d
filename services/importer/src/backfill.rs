//! Backfill requests given on the command line as `DATE CYCLE` pairs.

use anyhow::{bail, Result};
use forecast_common::{IssuanceTime, Model};
use tracing::warn;

use crate::orchestrator::JobKey;

/// Parse `YYYYMMDD HH` pairs. An odd argument count rejects the whole
/// request; individual invalid pairs are logged and skipped.
pub fn parse_pairs(args: &[String]) -> Result<Vec<IssuanceTime>> {
    if args.len() % 2 != 0 {
        bail!(
            "backfill arguments must be DATE CYCLE pairs, got {} values",
            args.len()
        );
    }

    let mut issuances = Vec::with_capacity(args.len() / 2);
    for pair in args.chunks_exact(2) {
        match IssuanceTime::parse(&pair[0], &pair[1]) {
            Ok(issuance) if !issuances.contains(&issuance) => issuances.push(issuance),
            Ok(_) => {}
            Err(e) => warn!(date = %pair[0], cycle = %pair[1], error = %e, "Skipping backfill pair"),
        }
    }
    Ok(issuances)
}

/// One job per issuance and model.
pub fn jobs(issuances: &[IssuanceTime], models: &[Model]) -> Vec<JobKey> {
    issuances
        .iter()
        .flat_map(|issuance| models.iter().map(move |model| JobKey::new(*model, *issuance)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pairs_parsed_in_order() {
        let parsed = parse_pairs(&args(&["20240301", "00", "20240229", "18"])).unwrap();
        assert_eq!(
            parsed,
            vec![
                IssuanceTime::parse("20240301", "00").unwrap(),
                IssuanceTime::parse("20240229", "18").unwrap(),
            ]
        );
    }

    #[test]
    fn test_odd_count_rejected() {
        assert!(parse_pairs(&args(&["20240301", "00", "20240302"])).is_err());
    }

    #[test]
    fn test_invalid_pairs_skipped() {
        let parsed =
            parse_pairs(&args(&["2024-03-01", "00", "20240301", "03", "20240301", "12"])).unwrap();
        assert_eq!(parsed, vec![IssuanceTime::parse("20240301", "12").unwrap()]);
    }

    #[test]
    fn test_empty_is_ok() {
        assert!(parse_pairs(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_jobs_cross_models() {
        let issuances = parse_pairs(&args(&["20240301", "06"])).unwrap();
        let keys = jobs(&issuances, &[Model::Ecmwf, Model::Gfs]);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].to_string(), "ecmwf/2024030106");
    }
}
