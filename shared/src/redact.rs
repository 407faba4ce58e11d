use url::Url;

const MASK: &str = "****";

/// Replaces the password of a connection string with a fixed mask so it can be logged.
///
/// Strings that do not parse as URLs are not echoed back at all, since the
/// position of the secret cannot be known.
pub fn redact_credentials(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(mut url) => {
            if url.password().is_some() {
                // Only fails for URLs that cannot carry credentials in the first place.
                let _ = url.set_password(Some(MASK));
            }
            url.to_string()
        }
        Err(_) => "<unparseable connection string>".to_string(),
    }
}
