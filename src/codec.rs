//! MEX wire grammar.
//!
//! Protocol Overview:
//! - Format: ASCII command/response, one line each, `\n` terminated
//! - Query: `MEX>{TAG}?` -> `MEX>{TAG}_{value}`
//! - Set: `MEX>{TAG}!_{value}` -> `MEX>{TAG}_{value}`
//! - Status: `MEX>STATUS?` -> `DIS_COF_DIRECT_ERR_{code}` (see [`crate::status`])
//!
//! The echoed `MEX>{TAG}` token is the device's only acknowledgment, so every
//! parameter reply is checked against the tag that was sent.

use crate::error::{MexError, MexResult};
use std::fmt;
use std::str::FromStr;

/// Prefix shared by every request and every parameter echo.
pub const COMMAND_PREFIX: &str = "MEX>";

/// Separates the echo token from the payload in a reply.
pub const REPLY_DELIMITER: char = '_';

/// Status query; its reply follows [`crate::status::STATUS_PREFIX`].
pub const STATUS_QUERY: &str = "MEX>STATUS?";

/// Protocol tag of a controllable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterTag {
    /// Central wavelength (nm)
    Cwl,
    /// Magnification
    Mag,
    /// Magnification offset factor
    Mof,
    /// Divergence offset factor
    Dof,
}

impl ParameterTag {
    /// The closed set of tags the device understands.
    pub const ALL: [ParameterTag; 4] = [
        ParameterTag::Cwl,
        ParameterTag::Mag,
        ParameterTag::Mof,
        ParameterTag::Dof,
    ];

    /// Wire form of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterTag::Cwl => "CWL",
            ParameterTag::Mag => "MAG",
            ParameterTag::Mof => "MOF",
            ParameterTag::Dof => "DOF",
        }
    }

    /// Logical parameter name used by [`crate::store::ParameterStore`].
    pub fn name(&self) -> &'static str {
        match self {
            ParameterTag::Cwl => "wavelength",
            ParameterTag::Mag => "magnification",
            ParameterTag::Mof => "mag_offset",
            ParameterTag::Dof => "divergence",
        }
    }

    /// Physical unit, if the parameter has one.
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            ParameterTag::Cwl => Some("nm"),
            _ => None,
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            ParameterTag::Cwl => "wavelength",
            ParameterTag::Mag => "magnification",
            ParameterTag::Mof => "magnification adjustment",
            ParameterTag::Dof => "divergence adjustment",
        }
    }

    /// Echo token the device answers with, e.g. `MEX>CWL`.
    pub fn echo(&self) -> String {
        format!("{}{}", COMMAND_PREFIX, self.as_str())
    }
}

impl fmt::Display for ParameterTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParameterTag {
    type Err = MexError;

    /// Parses the wire form (`CWL`, `MAG`, `MOF`, `DOF`), case-sensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParameterTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| MexError::UnknownParameter(s.to_string()))
    }
}

/// Build a query request, e.g. `MEX>CWL?`.
pub fn build_query(tag: ParameterTag) -> String {
    format!("{}{}?", COMMAND_PREFIX, tag)
}

/// Build a set request, e.g. `MEX>CWL!_532.0`.
///
/// # Errors
///
/// [`MexError::InvalidValue`] for NaN or infinite values.
pub fn build_set(tag: ParameterTag, value: f64) -> MexResult<String> {
    Ok(format!(
        "{}{}!{}{}",
        COMMAND_PREFIX,
        tag,
        REPLY_DELIMITER,
        format_value(value)?
    ))
}

/// Render a value as a locale-independent decimal.
///
/// Uses the shortest representation that round-trips and always keeps a
/// fractional part (`532.0`, `2.5`, `-0.125`).
pub fn format_value(value: f64) -> MexResult<String> {
    if !value.is_finite() {
        return Err(MexError::InvalidValue(value));
    }
    Ok(format!("{:?}", value))
}

/// Split a reply into `(echo, payload)` and verify the echo against `tag`.
///
/// The reply must contain exactly one `_`. The echo token must equal
/// `MEX>{tag}` byte for byte.
fn split_reply(tag: ParameterTag, raw: &str) -> MexResult<&str> {
    let (echo, payload) = raw
        .split_once(REPLY_DELIMITER)
        .filter(|(_, payload)| !payload.contains(REPLY_DELIMITER))
        .ok_or_else(|| MexError::FormatMismatch {
            reply: raw.to_string(),
        })?;

    let expected = tag.echo();
    if echo != expected {
        return Err(MexError::EchoMismatch {
            expected,
            reply: raw.to_string(),
        });
    }

    Ok(payload)
}

/// Validate a query reply and return its numeric payload.
///
/// # Errors
///
/// - [`MexError::FormatMismatch`] if the reply is not `<echo>_<payload>`
/// - [`MexError::EchoMismatch`] if the echo is not `MEX>{tag}`
/// - [`MexError::ValueParse`] if the payload is not a number
pub fn parse_query_reply(tag: ParameterTag, raw: &str) -> MexResult<f64> {
    let payload = split_reply(tag, raw)?;
    parse_number(payload)
}

/// Validate a set reply.
///
/// Only the echoed tag is checked. The payload is not compared with the value
/// that was sent.
pub fn parse_set_reply(tag: ParameterTag, raw: &str) -> MexResult<()> {
    split_reply(tag, raw).map(|_| ())
}

fn parse_number(payload: &str) -> MexResult<f64> {
    payload
        .trim()
        .parse::<f64>()
        .map_err(|e| MexError::ValueParse {
            payload: payload.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_build_query() {
        assert_eq!(build_query(ParameterTag::Cwl), "MEX>CWL?");
        assert_eq!(build_query(ParameterTag::Dof), "MEX>DOF?");
    }

    #[test]
    fn test_build_set() {
        assert_eq!(build_set(ParameterTag::Cwl, 532.0).unwrap(), "MEX>CWL!_532.0");
        assert_eq!(build_set(ParameterTag::Mag, 2.5).unwrap(), "MEX>MAG!_2.5");
        assert_eq!(build_set(ParameterTag::Mof, -0.125).unwrap(), "MEX>MOF!_-0.125");
    }

    #[test]
    fn test_build_set_rejects_non_finite() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = build_set(ParameterTag::Mag, value).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidValue);
        }
    }

    #[test]
    fn test_format_value_round_trips() {
        for value in [0.0, 1.0, 0.1, 1064.25, -3.75, 1e-7, 123456789.0] {
            let text = format_value(value).unwrap();
            assert_eq!(text.parse::<f64>().unwrap(), value, "value {}", text);
        }
    }

    #[test]
    fn test_query_reply_wavelength() {
        assert_eq!(parse_query_reply(ParameterTag::Cwl, "MEX>CWL_532.0").unwrap(), 532.0);
    }

    #[test]
    fn test_query_reply_integer_payload() {
        assert_eq!(parse_query_reply(ParameterTag::Mag, "MEX>MAG_3").unwrap(), 3.0);
    }

    #[test]
    fn test_query_reply_wrong_tag() {
        let err = parse_query_reply(ParameterTag::Mof, "MEX>MAG_2.5").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EchoMismatch);
    }

    #[test]
    fn test_query_reply_empty_is_format_mismatch() {
        for tag in ParameterTag::ALL {
            let err = parse_query_reply(tag, "").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::FormatMismatch);
        }
    }

    #[test]
    fn test_query_reply_without_delimiter() {
        let err = parse_query_reply(ParameterTag::Cwl, "MEX>CWL532.0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatMismatch);
    }

    #[test]
    fn test_query_reply_extra_delimiter() {
        let err = parse_query_reply(ParameterTag::Cwl, "MEX>CWL_532_0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatMismatch);
    }

    #[test]
    fn test_query_reply_case_sensitive_echo() {
        let err = parse_query_reply(ParameterTag::Cwl, "mex>cwl_532.0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EchoMismatch);
    }

    #[test]
    fn test_query_reply_non_numeric_payload() {
        let err = parse_query_reply(ParameterTag::Cwl, "MEX>CWL_abc").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueParse);

        let err = parse_query_reply(ParameterTag::Cwl, "MEX>CWL_").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueParse);
    }

    #[test]
    fn test_set_reply_echo_with_set_marker_rejected() {
        let err = parse_set_reply(ParameterTag::Cwl, "MEX>CWL!_532.0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EchoMismatch);
    }

    #[test]
    fn test_set_reply_ignores_payload() {
        assert!(parse_set_reply(ParameterTag::Cwl, "MEX>CWL_999").is_ok());
        assert!(parse_set_reply(ParameterTag::Cwl, "MEX>CWL_not-a-number").is_ok());
    }

    #[test]
    fn test_set_request_echo_accepted_for_every_tag() {
        for tag in ParameterTag::ALL {
            for value in [0.0, 1.5, 800.0, -2.25] {
                let request = build_set(tag, value).unwrap();
                // the device answers with the request minus the '!' set marker
                let reply = request.replacen('!', "", 1);
                assert!(parse_set_reply(tag, &reply).is_ok(), "reply {}", reply);
                assert_eq!(parse_query_reply(tag, &reply).unwrap(), value);
            }
        }
    }

    #[test]
    fn test_tag_from_str() {
        assert_eq!("CWL".parse::<ParameterTag>().unwrap(), ParameterTag::Cwl);
        assert_eq!("DOF".parse::<ParameterTag>().unwrap(), ParameterTag::Dof);
        let err = "STATUS".parse::<ParameterTag>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownParameter);
    }

    #[test]
    fn test_tag_metadata() {
        assert_eq!(ParameterTag::Cwl.unit(), Some("nm"));
        assert_eq!(ParameterTag::Mag.unit(), None);
        assert_eq!(ParameterTag::Mof.label(), "magnification adjustment");
        assert_eq!(ParameterTag::Dof.name(), "divergence");
    }
}
