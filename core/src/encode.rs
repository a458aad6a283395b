//! Flattening of credentials, principals, usage and transactions into the
//! backend's bracketed parameter names.
//!
//! Values are left raw. `http::encode_params` applies the one and only
//! percent-encoding layer when the request is put on the wire, so encoded
//! timestamps are never escaped twice.

use crate::error::ClientError;
use crate::types::{AuthrepOptions, Credentials, Principal, Transaction, Usage};

pub type Params = Vec<(String, String)>;

pub fn push_credentials(params: &mut Params, credentials: &Credentials) -> Result<(), ClientError> {
    credentials.validate()?;
    match credentials {
        Credentials::ProviderKey {
            provider_key,
            service_id,
        } => {
            push(params, "provider_key", provider_key);
            if let Some(service_id) = service_id {
                push(params, "service_id", service_id);
            }
        }
        Credentials::ServiceToken {
            service_token,
            service_id,
        } => {
            push(params, "service_token", service_token);
            push(params, "service_id", service_id);
        }
    }
    Ok(())
}

/// Push principal fields, each key wrapped by `prefix` (`app_id` becomes
/// `transactions[0][app_id]` under prefix `transactions[0]`).
pub fn push_principal(
    params: &mut Params,
    prefix: Option<&str>,
    principal: &Principal,
) -> Result<(), ClientError> {
    principal.validate()?;
    match principal {
        Principal::AppId { app_id, app_key } => {
            push(params, &nested(prefix, "app_id"), app_id);
            if let Some(app_key) = app_key {
                push(params, &nested(prefix, "app_key"), app_key);
            }
        }
        Principal::UserKey(user_key) => push(params, &nested(prefix, "user_key"), user_key),
        Principal::OAuth {
            app_id,
            access_token,
        } => {
            push(params, &nested(prefix, "app_id"), app_id);
            if let Some(access_token) = access_token {
                push(params, &nested(prefix, "access_token"), access_token);
            }
        }
    }
    Ok(())
}

pub fn push_usage(params: &mut Params, prefix: Option<&str>, usage: &Usage) {
    let usage_key = nested(prefix, "usage");
    for (metric, value) in usage.iter() {
        params.push((format!("{usage_key}[{metric}]"), value.to_string()));
    }
}

pub fn push_authrep_options(params: &mut Params, options: &AuthrepOptions) {
    if let Some(user_id) = options.user_id.as_deref().filter(|v| !v.is_empty()) {
        push(params, "user_id", user_id);
    }
    if let Some(object) = options.object.as_deref().filter(|v| !v.is_empty()) {
        push(params, "object", object);
    }
    if options.no_body {
        push(params, "no_body", "true");
    }
}

/// Encode a batch under `transactions[<index>]`, keeping input order.
pub fn push_transactions(params: &mut Params, transactions: &[Transaction]) -> Result<(), ClientError> {
    for (index, transaction) in transactions.iter().enumerate() {
        let prefix = format!("transactions[{index}]");
        push_principal(params, Some(&prefix), &transaction.principal)?;
        push_usage(params, Some(&prefix), &transaction.usage);
        if let Some(timestamp) = &transaction.timestamp {
            push(params, &format!("{prefix}[timestamp]"), &timestamp.encode()?);
        }
    }
    Ok(())
}

fn nested(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}[{key}]"),
        None => key.to_string(),
    }
}

fn push(params: &mut Params, key: &str, value: &str) {
    if !value.is_empty() {
        params.push((key.to_string(), value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::Timestamp;

    fn pairs(params: &Params) -> Vec<(&str, &str)> {
        params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    #[test]
    fn provider_key_with_service_id() {
        let mut params = Params::new();
        let creds = Credentials::provider_key_for_service("1234abcd", "42").unwrap();
        push_credentials(&mut params, &creds).unwrap();
        assert_eq!(pairs(&params), vec![("provider_key", "1234abcd"), ("service_id", "42")]);
    }

    #[test]
    fn service_token_credentials() {
        let mut params = Params::new();
        let creds = Credentials::service_token("tok", "42").unwrap();
        push_credentials(&mut params, &creds).unwrap();
        assert_eq!(pairs(&params), vec![("service_token", "tok"), ("service_id", "42")]);
    }

    #[test]
    fn hand_built_blank_credentials_are_rejected() {
        let mut params = Params::new();
        let creds = Credentials::ProviderKey {
            provider_key: String::new(),
            service_id: None,
        };
        let err = push_credentials(&mut params, &creds).unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
        assert!(params.is_empty());
    }

    #[test]
    fn top_level_principal_and_usage() {
        let mut params = Params::new();
        push_principal(&mut params, None, &Principal::app_id_with_key("foo", "bar").unwrap()).unwrap();
        push_usage(&mut params, None, &Usage::new().with("hits", 1).with("transfer", 1024));
        assert_eq!(
            pairs(&params),
            vec![
                ("app_id", "foo"),
                ("app_key", "bar"),
                ("usage[hits]", "1"),
                ("usage[transfer]", "1024"),
            ]
        );
    }

    #[test]
    fn authrep_options_skip_unset_fields() {
        let mut params = Params::new();
        push_authrep_options(
            &mut params,
            &AuthrepOptions {
                user_id: Some("u1".to_string()),
                object: None,
                no_body: true,
            },
        );
        assert_eq!(pairs(&params), vec![("user_id", "u1"), ("no_body", "true")]);
    }

    #[test]
    fn transactions_are_indexed_in_input_order() {
        let mut params = Params::new();
        let transactions = vec![
            Transaction::new(Principal::user_key("foo").unwrap(), Usage::new().with("hits", 1))
                .at(Timestamp::Epoch(1_272_375_737)),
            Transaction::new(Principal::app_id("bar").unwrap(), Usage::new().with("hits", 2)),
        ];
        push_transactions(&mut params, &transactions).unwrap();
        assert_eq!(
            pairs(&params),
            vec![
                ("transactions[0][user_key]", "foo"),
                ("transactions[0][usage][hits]", "1"),
                ("transactions[0][timestamp]", "2010-04-27 13:42:17+00:00"),
                ("transactions[1][app_id]", "bar"),
                ("transactions[1][usage][hits]", "2"),
            ]
        );
    }

    #[test]
    fn empty_raw_timestamp_is_omitted() {
        let mut params = Params::new();
        let transactions = vec![Transaction::new(
            Principal::user_key("foo").unwrap(),
            Usage::new().with("hits", 1),
        )
        .at(Timestamp::Raw(String::new()))];
        push_transactions(&mut params, &transactions).unwrap();
        assert_eq!(
            pairs(&params),
            vec![("transactions[0][user_key]", "foo"), ("transactions[0][usage][hits]", "1")]
        );
    }

    #[test]
    fn raw_timestamp_is_not_rewritten() {
        let mut params = Params::new();
        let transactions = vec![Transaction::new(
            Principal::user_key("foo").unwrap(),
            Usage::new().with("hits", 1),
        )
        .at(Timestamp::Raw("2010-04-27 15:42:17 +02:00".to_string()))];
        push_transactions(&mut params, &transactions).unwrap();
        assert_eq!(params[2].1, "2010-04-27 15:42:17 +02:00");
    }
}
