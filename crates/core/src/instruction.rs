use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Instruction grammar versions this client knows how to execute.
pub const SUPPORTED_VERSIONS: &[u32] = &[1];

const VERSION_TAG: &str = "v";
const CODE_TAG: &str = "code=";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstructionError {
    #[error("malformed instruction {input:?}: {reason}")]
    Malformed { input: String, reason: &'static str },
}

impl InstructionError {
    fn malformed(input: &str, reason: &'static str) -> Self {
        InstructionError::Malformed {
            input: input.to_string(),
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    /// Shareable link-style charge.
    Link,
    /// Merchant-generated static or dynamic charge.
    Pay,
}

impl Scheme {
    pub fn tag(&self) -> &'static str {
        match self {
            Scheme::Link => "LINK",
            Scheme::Pay => "PAY",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "LINK" => Some(Scheme::Link),
            "PAY" => Some(Scheme::Pay),
            _ => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A decoded payment directive.
///
/// Fields are private so an instance can only come out of [`PaymentInstruction::parse`]
/// or [`PaymentInstruction::new`], both of which enforce the grammar.
///
/// A parsed instruction remembers the exact text it came from; that text, not the
/// canonical rendering, is what gets sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PaymentInstruction {
    scheme: Scheme,
    version: u32,
    code: String,
    #[serde(skip)]
    source: String,
}

impl PaymentInstruction {
    pub fn new(
        scheme: Scheme,
        version: u32,
        code: impl Into<String>,
    ) -> Result<Self, InstructionError> {
        let code = code.into();
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(InstructionError::malformed(&code, "unsupported version"));
        }
        if code.is_empty() {
            return Err(InstructionError::malformed(&code, "empty code"));
        }
        let source = format!("{}:{VERSION_TAG}{version};{CODE_TAG}{code}", scheme.tag());
        Ok(Self {
            scheme,
            version,
            code,
            source,
        })
    }

    /// Parse `scheme ":v" version ";code=" token`.
    ///
    /// The token runs to end of input and is kept verbatim.
    pub fn parse(raw: &str) -> Result<Self, InstructionError> {
        let (tag, rest) = raw
            .split_once(':')
            .ok_or_else(|| InstructionError::malformed(raw, "missing scheme separator"))?;
        let scheme = Scheme::from_tag(tag)
            .ok_or_else(|| InstructionError::malformed(raw, "unrecognized scheme"))?;

        let rest = rest
            .strip_prefix(VERSION_TAG)
            .ok_or_else(|| InstructionError::malformed(raw, "missing version tag"))?;
        let (digits, rest) = rest
            .split_once(';')
            .ok_or_else(|| InstructionError::malformed(raw, "missing code field"))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InstructionError::malformed(raw, "version is not numeric"));
        }
        let version: u32 = digits
            .parse()
            .map_err(|_| InstructionError::malformed(raw, "version out of range"))?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(InstructionError::malformed(raw, "unsupported version"));
        }

        let code = rest
            .strip_prefix(CODE_TAG)
            .ok_or_else(|| InstructionError::malformed(raw, "missing code field"))?;
        if code.is_empty() {
            return Err(InstructionError::malformed(raw, "empty code"));
        }

        Ok(Self {
            scheme,
            version,
            code: code.to_string(),
            source: raw.to_string(),
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// The text this instruction was parsed from, byte for byte.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Canonical textual form, the same string a merchant QR or link carries.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PaymentInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}{};{}{}",
            self.scheme.tag(),
            VERSION_TAG,
            self.version,
            CODE_TAG,
            self.code
        )
    }
}

impl FromStr for PaymentInstruction {
    type Err = InstructionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
