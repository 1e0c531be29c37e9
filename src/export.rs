// 📤 CSV export - one `Date,Value` row per observation

use crate::query::Series;
use anyhow::{Context, Result};
use std::io::Write;

pub fn write_series_csv<W: Write>(writer: W, series: &Series) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["Date", "Value"])
        .context("Failed to write CSV header")?;

    for obs in &series.values {
        let value = obs.value.map(|v| v.to_string()).unwrap_or_default();
        wtr.write_record([obs.year.to_string(), value])
            .context("Failed to write CSV row")?;
    }

    wtr.flush().context("Failed to flush CSV output")?;
    Ok(())
}

pub fn series_csv_bytes(series: &Series) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_series_csv(&mut buf, series)?;
    Ok(buf)
}

/// `{country}_{indicator}_financial_data.csv`
pub fn export_filename(series: &Series) -> String {
    format!("{}_{}_financial_data.csv", series.country, series.indicator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Observation;

    #[test]
    fn test_csv_has_header_and_blank_nulls() {
        let series = Series {
            country: "USA".to_string(),
            indicator: "NY.GDP.MKTP.CD".to_string(),
            values: vec![Observation::new(2020, Some(21.4)), Observation::new(2021, None)],
        };

        let csv = String::from_utf8(series_csv_bytes(&series).unwrap()).unwrap();

        assert_eq!(csv, "Date,Value\n2020,21.4\n2021,\n");
        assert_eq!(export_filename(&series), "USA_NY.GDP.MKTP.CD_financial_data.csv");
    }

    #[test]
    fn test_empty_series_is_header_only() {
        let series = Series {
            country: "USA".to_string(),
            indicator: "GDP".to_string(),
            values: vec![],
        };

        let csv = String::from_utf8(series_csv_bytes(&series).unwrap()).unwrap();
        assert_eq!(csv, "Date,Value\n");
    }
}
