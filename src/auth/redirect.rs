use url::Url;

/// Where to send the browser after sign-in.
///
/// Relative targets are resolved against `base_url`; absolute targets are
/// kept only when they share its origin. Anything else lands on `base_url`.
pub fn safe_redirect(target: &str, base_url: &str) -> String {
    if target.starts_with('/') {
        return format!("{base_url}{target}");
    }

    match (Url::parse(target), Url::parse(base_url)) {
        (Ok(t), Ok(base)) if t.origin() == base.origin() => target.to_string(),
        _ => base_url.to_string(),
    }
}
