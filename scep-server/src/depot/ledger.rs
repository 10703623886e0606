//! OpenSSL CA database (`index.txt`) lines.
//!
//! `STATUS \t EXPIRY \t REVOCATION \t SERIAL \t FILENAME \t ISSUER_CN \t DN`
//! with timestamps in `YYMMDDHHMMSSZ` (UTC).

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// Ledger file name inside the depot.
pub const LEDGER_FILE: &str = "index.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Valid,
    Revoked,
}

impl Status {
    fn flag(self) -> &'static str {
        match self {
            Self::Valid => "V",
            Self::Revoked => "R",
        }
    }
}

/// Whether `value` can sit in a ledger field: no tabs, newlines or other
/// control characters.
#[must_use]
pub fn is_safe_field(value: &str) -> bool {
    !value.chars().any(char::is_control)
}

/// One parsed ledger line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub status: Status,
    pub expiry: String,
    /// Empty while valid.
    pub revoked_at: String,
    pub serial: String,
    pub filename: String,
    pub issuer: String,
    pub dn: String,
}

impl LedgerEntry {
    /// Parse a `V` or `R` line. Other lines yield `None` and are carried
    /// through rewrites untouched.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        let status = match fields.first() {
            Some(&"V") => Status::Valid,
            Some(&"R") => Status::Revoked,
            _ => return None,
        };
        if fields.len() < 6 {
            return None;
        }
        Some(Self {
            status,
            expiry: fields[1].to_string(),
            revoked_at: fields[2].to_string(),
            serial: fields[3].to_string(),
            filename: fields[4].to_string(),
            issuer: fields[5].to_string(),
            dn: fields.get(6).copied().unwrap_or_default().to_string(),
        })
    }

    #[must_use]
    pub fn to_line(&self) -> String {
        [
            self.status.flag(),
            &self.expiry,
            &self.revoked_at,
            &self.serial,
            &self.filename,
            &self.issuer,
            &self.dn,
        ]
        .join("\t")
    }

    /// DN suffix match. An empty DN only matches entries without a DN.
    #[must_use]
    pub fn matches_dn(&self, dn: &str) -> bool {
        if dn.is_empty() {
            self.dn.is_empty()
        } else {
            self.dn.ends_with(dn)
        }
    }

    /// Copy of this entry revoked at `when`.
    #[must_use]
    pub fn revoked(&self, when: OffsetDateTime) -> Self {
        Self {
            status: Status::Revoked,
            revoked_at: format_time(when),
            ..self.clone()
        }
    }
}

/// Format a ledger timestamp. Years from 2050 on use the four-digit form,
/// as OpenSSL does.
#[must_use]
pub fn format_time(t: OffsetDateTime) -> String {
    let t = t.to_offset(UtcOffset::UTC);
    let year = t.year();
    let year = if (1950..2050).contains(&year) {
        format!("{:02}", year % 100)
    } else {
        format!("{year:04}")
    };
    format!(
        "{year}{:02}{:02}{:02}{:02}{:02}Z",
        u8::from(t.month()),
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    )
}

/// Parse `YYMMDDHHMMSSZ` (years below 50 are 20YY) or `YYYYMMDDHHMMSSZ`.
#[must_use]
pub fn parse_time(s: &str) -> Option<OffsetDateTime> {
    let digits = s.strip_suffix('Z')?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (year, rest) = match digits.len() {
        12 => {
            let yy: i32 = digits[..2].parse().ok()?;
            (if yy < 50 { 2000 + yy } else { 1900 + yy }, &digits[2..])
        }
        14 => (digits[..4].parse().ok()?, &digits[4..]),
        _ => return None,
    };
    let field = |i: usize| rest[i..i + 2].parse::<u8>().ok();

    let date = Date::from_calendar_date(year, Month::try_from(field(0)?).ok()?, field(2)?).ok()?;
    let time = Time::from_hms(field(4)?, field(6)?, field(8)?).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc())
}
