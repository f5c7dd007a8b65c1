use crate::error::DispatchError;
use crate::types::Recipient;
use anyhow::Result;
use std::io::Read;
use std::path::Path;

/// Read the recipient list from a CSV file with an
/// `Email,FirstName,LastName` header (snake_case headers also accepted).
///
/// Any unreadable or malformed row aborts the run.
pub fn load(path: &Path) -> Result<Vec<Recipient>> {
    let file = std::fs::File::open(path).map_err(|e| {
        DispatchError::RecipientSource(format!("cannot open {}: {}", path.display(), e))
    })?;
    from_reader(file)
}

pub fn from_reader<R: Read>(reader: R) -> Result<Vec<Recipient>> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut recipients = Vec::new();
    for (index, row) in csv.deserialize::<Recipient>().enumerate() {
        let recipient = row.map_err(|e| {
            // +2: one for the header, one for 1-based numbering.
            DispatchError::RecipientSource(format!("row {}: {}", index + 2, e))
        })?;
        recipients.push(recipient);
    }
    Ok(recipients)
}
