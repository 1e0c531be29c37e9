// 🌍 Default import catalogue - the countries and indicators tracked out of the box

use serde::{Deserialize, Serialize};

/// A (code, name) pair to import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub code: String,
    pub name: String,
}

impl CatalogEntry {
    pub fn new(code: &str, name: &str) -> Self {
        CatalogEntry {
            code: code.to_string(),
            name: name.to_string(),
        }
    }
}

const COUNTRIES: &[(&str, &str)] = &[
    // G7
    ("USA", "United States"),
    ("GBR", "United Kingdom"),
    ("DEU", "Germany"),
    ("FRA", "France"),
    ("JPN", "Japan"),
    ("ITA", "Italy"),
    ("CAN", "Canada"),
    // BRICS
    ("CHN", "China"),
    ("IND", "India"),
    ("BRA", "Brazil"),
    ("RUS", "Russia"),
    ("ZAF", "South Africa"),
    // Europe
    ("ESP", "Spain"),
    ("NLD", "Netherlands"),
    ("CHE", "Switzerland"),
    ("SWE", "Sweden"),
    ("NOR", "Norway"),
    ("DNK", "Denmark"),
    ("FIN", "Finland"),
    ("POL", "Poland"),
    // Asia
    ("KOR", "South Korea"),
    ("SGP", "Singapore"),
    ("HKG", "Hong Kong"),
    ("TWN", "Taiwan"),
    ("IDN", "Indonesia"),
    ("THA", "Thailand"),
    ("MYS", "Malaysia"),
    ("VNM", "Vietnam"),
    // Oceania
    ("AUS", "Australia"),
    ("NZL", "New Zealand"),
    // Latin America
    ("MEX", "Mexico"),
    ("ARG", "Argentina"),
    ("CHL", "Chile"),
    ("COL", "Colombia"),
    ("PER", "Peru"),
    // Middle East
    ("SAU", "Saudi Arabia"),
    ("ARE", "United Arab Emirates"),
    ("ISR", "Israel"),
    ("TUR", "Turkey"),
    ("EGY", "Egypt"),
];

const INDICATORS: &[(&str, &str)] = &[
    ("NY.GDP.MKTP.CD", "GDP (current US$)"),
    ("NY.GDP.PCAP.CD", "GDP per capita (current US$)"),
    ("NY.GDP.MKTP.KD.ZG", "GDP growth (annual %)"),
    ("FP.CPI.TOTL.ZG", "Inflation Rate"),
    ("NFPI.TOTL", "Food Price Index"),
    ("SL.UEM.TOTL.ZS", "Unemployment Rate"),
    ("SL.TLF.CACT.ZS", "Labor Force Participation Rate"),
    ("SL.EMP.TOTL.SP.ZS", "Employment to Population Ratio"),
    ("BN.CAB.XOKA.CD", "Current Account Balance"),
    ("NE.EXP.GNFS.ZS", "Exports of goods and services (% of GDP)"),
    ("NE.IMP.GNFS.ZS", "Imports of goods and services (% of GDP)"),
    ("BX.KLT.DINV.WD.GD.ZS", "Foreign Direct Investment (% of GDP)"),
    ("GC.DOD.TOTL.GD.ZS", "Government Debt to GDP"),
    ("GC.TAX.TOTL.GD.ZS", "Tax Revenue (% of GDP)"),
    ("FR.INR.LEND", "Lending Interest Rate"),
    ("CM.MKT.LCAP.GD.ZS", "Stock Market Capitalization to GDP"),
    ("SI.POV.GINI", "GINI Index"),
    ("SP.DYN.LE00.IN", "Life Expectancy"),
    ("SE.XPD.TOTL.GD.ZS", "Education Expenditure (% of GDP)"),
];

pub fn default_countries() -> Vec<CatalogEntry> {
    COUNTRIES
        .iter()
        .map(|(code, name)| CatalogEntry::new(code, name))
        .collect()
}

pub fn default_indicators() -> Vec<CatalogEntry> {
    INDICATORS
        .iter()
        .map(|(code, name)| CatalogEntry::new(code, name))
        .collect()
}

/// Keep only entries whose code is listed in `codes` (case-insensitive).
/// An empty `codes` keeps everything.
pub fn select(entries: Vec<CatalogEntry>, codes: &[String]) -> Vec<CatalogEntry> {
    if codes.is_empty() {
        return entries;
    }
    entries
        .into_iter()
        .filter(|entry| codes.iter().any(|c| c.eq_ignore_ascii_case(&entry.code)))
        .collect()
}

/// Requested codes that match no entry
pub fn unmatched<'a>(entries: &[CatalogEntry], codes: &'a [String]) -> Vec<&'a str> {
    codes
        .iter()
        .filter(|c| !entries.iter().any(|e| c.eq_ignore_ascii_case(&e.code)))
        .map(String::as_str)
        .collect()
}
