//! §4.A Portal client: a thin typed wrapper over `reqwest::blocking`,
//! grounded in the teacher's typed-client pattern (see `casparian_security`'s
//! Azure client) — one struct owning a configured `Client` plus credentials,
//! with methods returning `Result<_, PortalError>` instead of raw responses.

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderValue, IF_MATCH};
use serde_json::Value;

use crate::error::PortalError;
use crate::model::UploadCredentials;

/// Basic-auth key pair plus base URL for one portal instance.
#[derive(Debug, Clone)]
pub struct PortalCredentials {
    pub server: String,
    pub key_id: String,
    pub secret: String,
}

/// The portal HTTP client.
pub struct PortalClient {
    client: Client,
    credentials: PortalCredentials,
}

impl PortalClient {
    pub fn new(credentials: PortalCredentials) -> Result<Self, PortalError> {
        let client = Client::builder().build()?;
        Ok(Self { client, credentials })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.credentials.server.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn check_status(response: Response) -> Result<Response, PortalError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let status_code = status.as_u16();
            let body = response.text().unwrap_or_default();
            Err(PortalError::UnexpectedStatus {
                status: status_code,
                body,
            })
        }
    }

    /// Fetches a file's `item` at `@id?frame=edit&datastore=database`,
    /// returning the JSON body and its ETag (needed for a later PATCH).
    pub fn get_edit_view(&self, at_id: &str) -> Result<(Value, String), PortalError> {
        let url = self.url(&format!("{at_id}?frame=edit&datastore=database"));
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.key_id, Some(&self.credentials.secret))
            .send()?;
        let response = Self::check_status(response)?;
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or(PortalError::MissingEtag)?;
        let body: Value = response.json()?;
        Ok((body, etag))
    }

    /// Re-reads a file's current ETag only, used immediately before PATCH
    /// to detect concurrent modification.
    pub fn get_current_etag(&self, at_id: &str) -> Result<String, PortalError> {
        let (_, etag) = self.get_edit_view(at_id)?;
        Ok(etag)
    }

    /// Runs a portal search, returning the `@graph` array of matched items.
    pub fn search(&self, query: &str) -> Result<Vec<Value>, PortalError> {
        let url = self.url(&format!("search/?{query}"));
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.key_id, Some(&self.credentials.secret))
            .send()?;
        let response = Self::check_status(response)?;
        let body: Value = response.json()?;
        Ok(body
            .get("@graph")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Fetches a single file item by accession or `@id`, without the edit
    /// frame (used for `derived_from` traversal, not for PATCH setup).
    pub fn get_item(&self, at_id: &str) -> Result<Value, PortalError> {
        let url = self.url(&format!("{at_id}?frame=object&format=json&datastore=database"));
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.key_id, Some(&self.credentials.secret))
            .send()?;
        let response = Self::check_status(response)?;
        Ok(response.json()?)
    }

    /// Requests fresh upload credentials for a file.
    pub fn get_upload_credentials(&self, at_id: &str) -> Result<UploadCredentials, PortalError> {
        let url = self.url(&format!("{at_id}@@upload?datastore=database"));
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.credentials.key_id, Some(&self.credentials.secret))
            .send()?;
        let response = Self::check_status(response)?;
        let body: Value = response.json()?;
        let upload_credentials = body
            .get("@graph")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(|f| f.get("upload_credentials"))
            .cloned()
            .unwrap_or(Value::Null);
        Ok(UploadCredentials {
            upload_url: upload_credentials
                .get("upload_url")
                .and_then(Value::as_str)
                .map(String::from),
            expiration: upload_credentials
                .get("expiration")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok()),
        })
    }

    /// PATCHes a file record, setting `If-Match` to the ETag captured at
    /// edit-view read time. The caller must have already re-checked the
    /// ETag still matches (§4.A's two-read protocol) before calling this.
    pub fn patch_file(
        &self,
        at_id: &str,
        etag: &str,
        body: &Value,
    ) -> Result<Value, PortalError> {
        let url = self.url(at_id);
        let response = self
            .client
            .patch(&url)
            .basic_auth(&self.credentials.key_id, Some(&self.credentials.secret))
            .header(IF_MATCH, HeaderValue::from_str(etag).unwrap())
            .json(body)
            .send()?;
        let response = Self::check_status(response)?;
        Ok(response.json()?)
    }
}

impl crate::platform::FileLookup for PortalClient {
    fn get_item(&self, at_id: &str) -> Option<Value> {
        PortalClient::get_item(self, at_id).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_server_and_path_without_double_slash() {
        let client = PortalClient::new(PortalCredentials {
            server: "https://example.org/".to_string(),
            key_id: "k".to_string(),
            secret: "s".to_string(),
        })
        .unwrap();
        assert_eq!(
            client.url("/files/ENCFF000ABC/"),
            "https://example.org/files/ENCFF000ABC/"
        );
    }
}
