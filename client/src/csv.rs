//! Minimal CSV line splitting for the kiosk's data files.
//!
//! Only what the layout and availability files need: a double quote toggles
//! quoted mode, commas inside quotes are literal, and the quote characters
//! themselves are dropped. Escaped quotes (`""`) are not supported.

/// Split one line into fields.
#[must_use]
pub fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for ch in line.chars() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Lines of a text file with any trailing `\r` removed.
pub(crate) fn lines(text: &str) -> impl Iterator<Item = &str> {
    text.trim().split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line))
}

#[cfg(test)]
#[path = "csv_test.rs"]
mod tests;
