use std::fmt;
use strum_macros::Display;

/// Line terminator appended to every outbound command.
pub const TERMINATOR: &str = "\r";

/// Write-form commands the firmware answers with a line.
const READ_COMMANDS: &[&str] = &["FLASH:READ"];

/// Keyword appended to a command name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Suffix {
    /// Written directly after the name: `UI:LED1?`.
    #[strum(to_string = "?")]
    Query,
    /// Written as a separate token: `UI:LED1 TOGGLE`.
    #[strum(to_string = "TOGGLE")]
    Toggle,
}

/// A single command line, before the terminator is appended.
///
/// Field values must already be encoded (see [`crate::codec`]); the command
/// only assembles strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    suffix: Option<Suffix>,
    fields: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            suffix: None,
            fields: Vec::new(),
        }
    }

    /// A write command carrying `fields`, e.g. `DAC16:CH1 8032,7FCE`.
    pub fn write<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name).with_fields(fields)
    }

    pub fn query(name: impl Into<String>) -> Self {
        Self::new(name).with_suffix(Suffix::Query)
    }

    pub fn toggle(name: impl Into<String>) -> Self {
        Self::new(name).with_suffix(Suffix::Toggle)
    }

    /// A boolean write using the firmware's `ON`/`OFF` keywords.
    pub fn switch(name: impl Into<String>, on: bool) -> Self {
        Self::new(name).with_field(if on { "ON" } else { "OFF" })
    }

    pub fn with_suffix(mut self, suffix: Suffix) -> Self {
        self.suffix = Some(suffix);
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn suffix(&self) -> Option<Suffix> {
        self.suffix
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn is_query(&self) -> bool {
        self.suffix == Some(Suffix::Query)
    }

    /// Whether the firmware answers this command with one line: every query,
    /// plus the write-form reads such as `FLASH:READ`.
    pub fn expects_reply(&self) -> bool {
        self.is_query()
            || READ_COMMANDS
                .iter()
                .any(|name| name.eq_ignore_ascii_case(&self.name))
    }

    /// The full wire line including the carriage-return terminator.
    pub fn to_line(&self) -> String {
        format(&self.name, self.suffix, self.fields.as_slice())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_command(f, &self.name, self.suffix, self.fields.as_slice())
    }
}

/// Split a typed line such as `ADC24:REG? A` or `UI:LED2 TOGGLE` back into
/// its parts. Surrounding whitespace and the terminator are ignored.
impl From<&str> for Command {
    fn from(line: &str) -> Self {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        let command = match head.strip_suffix('?') {
            Some(name) => Self::query(name),
            None if rest.eq_ignore_ascii_case("TOGGLE") => return Self::toggle(head),
            None => Self::new(head),
        };
        if rest.is_empty() {
            command
        } else {
            command.with_fields(rest.split(',').map(str::trim))
        }
    }
}

fn write_command<W, S>(out: &mut W, name: &str, suffix: Option<Suffix>, fields: &[S]) -> fmt::Result
where
    W: fmt::Write,
    S: AsRef<str>,
{
    out.write_str(name)?;
    match suffix {
        Some(Suffix::Query) => write!(out, "{}", Suffix::Query)?,
        Some(Suffix::Toggle) => write!(out, " {}", Suffix::Toggle)?,
        None => {}
    }
    for (i, field) in fields.iter().enumerate() {
        out.write_char(if i == 0 { ' ' } else { ',' })?;
        out.write_str(field.as_ref())?;
    }
    Ok(())
}

/// Assemble `NAME[?| TOGGLE][ field0[,field1,...]]\r`.
pub fn format<S: AsRef<str>>(name: &str, suffix: Option<Suffix>, fields: &[S]) -> String {
    let mut line = String::with_capacity(name.len() + 8 + fields.len() * 5);
    // writing into a String cannot fail
    let _ = write_command(&mut line, name, suffix, fields);
    line.push_str(TERMINATOR);
    line
}
