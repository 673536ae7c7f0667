use std::{collections::BTreeMap, mem};

use super::RequestError;

/// Parses a query string of `key=value` pairs joined by `&`.
///
/// Keys are letters only, values letters or digits. A repeated key keeps its first
/// value; later occurrences are ignored.
pub fn parse_parameters(query: &str) -> Result<BTreeMap<String, String>, RequestError> {
    if query.chars().count() < 3 {
        return Err(RequestError::ParametersTooShort(query.to_string()));
    }

    let mut params = BTreeMap::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_key = true;

    for ch in query.chars() {
        if in_key {
            match ch {
                '=' if key.is_empty() => return Err(RequestError::EmptyParameterKey),
                '=' => in_key = false,
                c if c.is_ascii_alphabetic() => key.push(c),
                c => return Err(RequestError::InvalidParameterKey(c)),
            }
        } else {
            match ch {
                '&' if value.is_empty() => return Err(RequestError::EmptyParameterValue),
                '&' => {
                    params.entry(mem::take(&mut key)).or_insert(mem::take(&mut value));
                    in_key = true;
                }
                c if c.is_ascii_alphanumeric() => value.push(c),
                c => return Err(RequestError::InvalidParameterValue(c)),
            }
        }
    }

    // Covers a trailing '&', a key with no '=' and a key with no value.
    if in_key || value.is_empty() {
        return Err(RequestError::UnfinishedParameter(query.to_string()));
    }
    params.entry(key).or_insert(value);

    Ok(params)
}

pub(crate) fn validate_parameter(key: &str, value: &str) -> Result<(), RequestError> {
    if key.is_empty() {
        return Err(RequestError::EmptyParameterKey);
    }
    if value.is_empty() {
        return Err(RequestError::EmptyParameterValue);
    }
    if let Some(c) = key.chars().find(|c| !c.is_ascii_alphabetic()) {
        return Err(RequestError::InvalidParameterKey(c));
    }
    if let Some(c) = value.chars().find(|c| !c.is_ascii_alphanumeric()) {
        return Err(RequestError::InvalidParameterValue(c));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs() {
        let params = parse_parameters("a=1&b=22").unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params["a"], "1");
        assert_eq!(params["b"], "22");
    }

    #[test]
    fn first_duplicate_wins() {
        let params = parse_parameters("a=1&a=2").unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params["a"], "1");
    }

    #[test]
    fn rejects_short_input() {
        assert_eq!(
            parse_parameters("a="),
            Err(RequestError::ParametersTooShort("a=".to_string()))
        );
    }

    #[test]
    fn rejects_trailing_ampersand() {
        assert_eq!(
            parse_parameters("a=1&"),
            Err(RequestError::UnfinishedParameter("a=1&".to_string()))
        );
    }

    #[test]
    fn rejects_leading_equals() {
        assert_eq!(parse_parameters("=abc"), Err(RequestError::EmptyParameterKey));
    }

    #[test]
    fn rejects_missing_value() {
        assert_eq!(
            parse_parameters("abc"),
            Err(RequestError::UnfinishedParameter("abc".to_string()))
        );
        assert_eq!(
            parse_parameters("ab="),
            Err(RequestError::UnfinishedParameter("ab=".to_string()))
        );
        assert_eq!(parse_parameters("a=&b=1"), Err(RequestError::EmptyParameterValue));
    }

    #[test]
    fn rejects_bad_characters() {
        assert_eq!(
            parse_parameters("a1=2"),
            Err(RequestError::InvalidParameterKey('1'))
        );
        assert_eq!(
            parse_parameters("a=-2"),
            Err(RequestError::InvalidParameterValue('-'))
        );
    }
}
