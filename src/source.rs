use std::rc::Rc;

/// A named source file whose text is retained for the lifetime of every
/// function compiled or defined from it, so diagnostics can always show the
/// offending line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: String,
    pub text: String,
}

pub type SourceRef = Rc<Source>;

impl Source {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> SourceRef {
        let mut text = text.into();
        // Tolerate a UTF-8 byte-order mark at the start of the file.
        if let Some(stripped) = text.strip_prefix('\u{feff}') {
            text = stripped.to_string();
        }
        Rc::new(Self {
            name: name.into(),
            text,
        })
    }

    pub fn line(&self, line: usize) -> Option<&str> {
        if line == 0 {
            return None;
        }
        self.text.lines().nth(line - 1)
    }
}
