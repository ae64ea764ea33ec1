use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::io::Cursor;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use digest_auth::AuthContext;
use reqwest::{
    Client, Response as HttpResponse, StatusCode, Url,
    header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT, WWW_AUTHENTICATE},
};
use tracing::{debug, warn};
use xmlrpc::{Fault, Request, Transport, Value};

use crate::config::AppConfig;
use crate::domain::ticket::{Ticket, TicketChanges, TicketNumber};
use crate::error::{AppError, AppResult, AuthFailure};
use crate::services::IssueTrackerService;

const TRAC_TIME_FORMAT: &str = "%Y%m%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Anonymous,
    Authenticated,
}

/// Feeds a response body that has already been received over HTTP to the
/// xmlrpc parser.
struct ReceivedBody(String);

impl Transport for ReceivedBody {
    type Stream = Cursor<Vec<u8>>;

    fn transmit(
        self,
        _request: &Request<'_>,
    ) -> Result<Self::Stream, Box<dyn StdError + Send + Sync>> {
        Ok(Cursor::new(self.0.into_bytes()))
    }
}

/// XML-RPC client for trac; reads are anonymous, writes use digest auth.
pub struct TracClient {
    http: Client,
    anonymous_url: String,
    authenticated_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl TracClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http: Client::new(),
            anonymous_url: config.anonymous_endpoint(),
            authenticated_url: config.authenticated_endpoint(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    fn credentials(&self) -> AppResult<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => Ok((user, pass)),
            _ => Err(AppError::AuthenticationRequired(
                AuthFailure::MissingCredentials,
            )),
        }
    }

    async fn call(
        &self,
        tier: Tier,
        method: &str,
        params: Vec<Value>,
        ticket: Option<TicketNumber>,
    ) -> AppResult<Value> {
        let request = params
            .into_iter()
            .fold(Request::new(method), |request, param| request.arg(param));
        let mut body = Vec::new();
        request.write_as_xml(&mut body)?;
        debug!(method, ?tier, "trac rpc call");

        let response = match tier {
            Tier::Anonymous => {
                let response = self.post(&self.anonymous_url, &body, None).await?;
                if response.status() == StatusCode::UNAUTHORIZED {
                    return Err(AppError::RemoteUnavailable(
                        "anonymous access was refused by the server".to_string(),
                    ));
                }
                response
            }
            Tier::Authenticated => self.post_with_digest(&body).await?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::RemoteUnavailable(format!(
                "server responded with {status}"
            )));
        }
        let text = response
            .text()
            .await
            .map_err(|err| AppError::RemoteUnavailable(format!("failed to read response: {err}")))?;

        request.call(ReceivedBody(text)).map_err(|err| match err.fault() {
            Some(fault) => map_fault(fault, ticket),
            None => AppError::IssueTracker(format!("invalid response to {method}: {err}")),
        })
    }

    async fn post_with_digest(&self, body: &[u8]) -> AppResult<HttpResponse> {
        let (user, pass) = self.credentials()?;
        let url = &self.authenticated_url;

        let first = self.post(url, body, None).await?;
        if first.status() != StatusCode::UNAUTHORIZED {
            return Ok(first);
        }

        let challenge = first
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                AppError::RemoteUnavailable("401 response without a digest challenge".to_string())
            })?;
        let mut prompt = digest_auth::parse(challenge).map_err(|err| {
            AppError::RemoteUnavailable(format!("unsupported authentication challenge: {err}"))
        })?;
        let uri = Url::parse(url)
            .map(|parsed| parsed.path().to_string())
            .map_err(|err| AppError::Configuration(format!("invalid trac url {url}: {err}")))?;
        let context = AuthContext::new_post(user, pass, uri, Some(body));
        let answer = prompt.respond(&context).map_err(|err| {
            AppError::RemoteUnavailable(format!("failed to answer digest challenge: {err}"))
        })?;

        let second = self
            .post(url, body, Some(answer.to_header_string()))
            .await?;
        if second.status() == StatusCode::UNAUTHORIZED {
            return Err(AppError::AuthenticationRequired(AuthFailure::Rejected));
        }
        Ok(second)
    }

    async fn post(
        &self,
        url: &str,
        body: &[u8],
        authorization: Option<String>,
    ) -> AppResult<HttpResponse> {
        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "text/xml")
            .header(USER_AGENT, concat!("git-trac/", env!("CARGO_PKG_VERSION")))
            .body(body.to_vec());
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }
        request
            .send()
            .await
            .map_err(|err| AppError::RemoteUnavailable(format!("failed to call {url}: {err}")))
    }
}

#[async_trait]
impl IssueTrackerService for TracClient {
    async fn get_ticket(&self, number: TicketNumber) -> AppResult<Ticket> {
        let value = self
            .call(
                Tier::Anonymous,
                "ticket.get",
                vec![ticket_param(number)?],
                Some(number),
            )
            .await?;
        ticket_from_value(number, &value)
    }

    async fn find_ticket_by_branch(&self, branch: &str) -> AppResult<Option<TicketNumber>> {
        let value = self
            .call(
                Tier::Anonymous,
                "search.branch",
                vec![Value::from(branch)],
                None,
            )
            .await?;
        first_ticket_of_search(&value)
    }

    async fn update_ticket(
        &self,
        number: TicketNumber,
        expected_timestamp: &str,
        changes: TicketChanges,
    ) -> AppResult<()> {
        let mut attributes: BTreeMap<String, Value> = changes
            .fields
            .into_iter()
            .map(|(field, value)| (field, Value::String(value)))
            .collect();
        attributes.insert("_ts".to_string(), Value::from(expected_timestamp));
        let params = vec![
            ticket_param(number)?,
            Value::String(changes.comment),
            Value::Struct(attributes),
            Value::Bool(true),
        ];
        self.call(Tier::Authenticated, "ticket.update", params, Some(number))
            .await?;
        Ok(())
    }

    async fn create_ticket(&self, summary: &str, description: &str) -> AppResult<TicketNumber> {
        let params = vec![
            Value::from(summary),
            Value::from(description),
            Value::Struct(BTreeMap::new()),
            Value::Bool(true),
        ];
        let value = self
            .call(Tier::Authenticated, "ticket.create", params, None)
            .await?;
        as_ticket_number(&value)
            .ok_or_else(|| AppError::IssueTracker(format!("unexpected ticket.create result {value:?}")))
    }

    async fn query_tickets(&self, query: &str) -> AppResult<Vec<TicketNumber>> {
        let value = self
            .call(
                Tier::Anonymous,
                "ticket.query",
                vec![Value::from(query)],
                None,
            )
            .await?;
        let items = value
            .as_array()
            .ok_or_else(|| AppError::IssueTracker("ticket.query did not return a list".to_string()))?;
        items
            .iter()
            .map(|item| {
                as_ticket_number(item).ok_or_else(|| {
                    AppError::IssueTracker(format!("invalid ticket number {item:?}"))
                })
            })
            .collect()
    }
}

/// Trac ticket ids are `<int>`; anything wider cannot name a ticket.
fn ticket_param(number: TicketNumber) -> AppResult<Value> {
    i32::try_from(number)
        .map(Value::Int)
        .map_err(|_| AppError::TicketNotFound(number))
}

fn as_ticket_number(value: &Value) -> Option<TicketNumber> {
    value.as_i64().and_then(|n| TicketNumber::try_from(n).ok())
}

/// Maps the `[id, created, modified, attributes]` reply of `ticket.get`.
fn ticket_from_value(number: TicketNumber, value: &Value) -> AppResult<Ticket> {
    let malformed = || AppError::IssueTracker(format!("malformed ticket.get reply for #{number}"));
    let items = value.as_array().ok_or_else(malformed)?;
    let [id, created, modified, attributes] = items else {
        return Err(malformed());
    };
    let fields: BTreeMap<String, String> = attributes
        .as_struct()
        .ok_or_else(malformed)?
        .iter()
        .map(|(key, value)| (key.clone(), field_text(value)))
        .collect();
    Ok(Ticket::from_fields(
        as_ticket_number(id).unwrap_or(number),
        parse_time(created),
        parse_time(modified),
        &fields,
    ))
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Int(n) => n.to_string(),
        Value::Int64(n) => n.to_string(),
        Value::Bool(flag) => (if *flag { "1" } else { "0" }).to_string(),
        Value::Double(n) => n.to_string(),
        Value::DateTime(_) => parse_time(value)
            .map(|time| time.format(TRAC_TIME_FORMAT).to_string())
            .unwrap_or_default(),
        Value::Base64(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::Struct(_) | Value::Array(_) | Value::Nil => String::new(),
    }
}

/// Trac sends naive UTC timestamps in calendar form.
fn parse_time(value: &Value) -> Option<NaiveDateTime> {
    let stamp = value.as_datetime()?;
    let iso8601::Date::YMD { year, month, day } = stamp.date else {
        warn!("ignoring non-calendar trac timestamp {stamp:?}");
        return None;
    };
    let time = stamp.time;
    let parsed = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(time.hour, time.minute, time.second));
    if parsed.is_none() {
        warn!("ignoring out of range trac timestamp {stamp:?}");
    }
    parsed
}

/// `search.branch` returns `[[ticket, ...], ...]`; an empty list means no match.
fn first_ticket_of_search(value: &Value) -> AppResult<Option<TicketNumber>> {
    let hits = value
        .as_array()
        .ok_or_else(|| AppError::IssueTracker("search.branch did not return a list".to_string()))?;
    let Some(first) = hits.first() else {
        return Ok(None);
    };
    let number = first
        .as_array()
        .and_then(|row| row.first())
        .and_then(as_ticket_number)
        .ok_or_else(|| AppError::IssueTracker(format!("invalid search.branch row {first:?}")))?;
    Ok(Some(number))
}

fn map_fault(fault: &Fault, ticket: Option<TicketNumber>) -> AppError {
    let message = fault.fault_string.to_lowercase();
    match ticket {
        Some(number) if fault.fault_code == 404 || message.contains("does not exist") => {
            AppError::TicketNotFound(number)
        }
        Some(number) if message.contains("modified by someone else") || message.contains("has been modified") => {
            AppError::ConcurrentModification(number)
        }
        _ => AppError::IssueTracker(format!(
            "{} (fault code {})",
            fault.fault_string, fault.fault_code
        )),
    }
}
