use crate::error::DispatchError;
use crate::types::Recipient;
use anyhow::Result;
use std::path::Path;

/// Tokens recognised in a template. Anything else in braces is left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    FirstName,
    LastName,
}

impl Placeholder {
    pub const ALL: [Placeholder; 2] = [Placeholder::FirstName, Placeholder::LastName];

    pub fn token(self) -> &'static str {
        match self {
            Self::FirstName => "{first_name}",
            Self::LastName => "{last_name}",
        }
    }

    fn value(self, recipient: &Recipient) -> &str {
        match self {
            Self::FirstName => &recipient.first_name,
            Self::LastName => &recipient.last_name,
        }
    }
}

/// Raw HTML body shared read-only by every message of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    html: String,
}

impl MessageTemplate {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    /// A template that cannot be read is fatal for the run.
    pub fn load(path: &Path) -> Result<Self> {
        let html =
            std::fs::read_to_string(path).map_err(|e| DispatchError::missing(path, e))?;
        Ok(Self::new(html))
    }

    pub fn render(&self, recipient: &Recipient) -> String {
        substitute(&self.html, recipient)
    }
}

/// Single left-to-right pass, so substituted values are never re-scanned.
pub fn substitute(template: &str, recipient: &Recipient) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match Placeholder::ALL
            .iter()
            .find(|p| tail.starts_with(p.token()))
        {
            Some(p) => {
                out.push_str(p.value(recipient));
                rest = &tail[p.token().len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ana() -> Recipient {
        Recipient::new("ana@example.com", "Ana", "Lee")
    }

    #[test]
    fn substitutes_both_names() {
        assert_eq!(substitute("Hi {first_name} {last_name}!", &ana()), "Hi Ana Lee!");
    }

    #[test]
    fn template_without_placeholders_is_unchanged() {
        let html = "<p>Nothing to see {here}</p>";
        assert_eq!(substitute(html, &ana()), html);
    }

    #[test]
    fn every_occurrence_is_replaced() {
        assert_eq!(
            substitute("{first_name}/{first_name}/{last_name}", &ana()),
            "Ana/Ana/Lee"
        );
    }

    #[test]
    fn unknown_tokens_pass_through() {
        assert_eq!(
            substitute("{first_name} {middle_name} {last_name", &ana()),
            "Ana {middle_name} {last_name"
        );
    }

    #[test]
    fn empty_names_become_empty_strings() {
        let r = Recipient::new("x@example.com", "", "");
        assert_eq!(substitute("Hi {first_name}{last_name}.", &r), "Hi .");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let r = Recipient::new("x@example.com", "{last_name}", "Lee");
        assert_eq!(substitute("{first_name} {last_name}", &r), "{last_name} Lee");
    }

    #[test]
    fn handles_multibyte_text() {
        let r = Recipient::new("x@example.com", "Zoë", "Ñúñez");
        assert_eq!(
            substitute("¡Hola {first_name} {last_name}! {", &r),
            "¡Hola Zoë Ñúñez! {"
        );
    }

    #[test]
    fn missing_template_is_missing_resource() {
        let err = MessageTemplate::load(Path::new("/no/such/template.html")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DispatchError>(),
            Some(DispatchError::MissingResource { .. })
        ));
    }

    #[test]
    fn loads_and_renders_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.html");
        std::fs::write(&path, "<h1>Dear {first_name}</h1>").unwrap();

        let template = MessageTemplate::load(&path).unwrap();
        assert_eq!(template.render(&ana()), "<h1>Dear Ana</h1>");
    }
}
