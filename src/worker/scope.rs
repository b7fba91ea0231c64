use color_eyre::{eyre::eyre, Result};
use url::Url;

/// The app root a worker is responsible for.
#[derive(Debug, Clone)]
pub struct Scope {
  root: Url,
}

impl Scope {
  pub fn new(origin: &str) -> Result<Self> {
    let mut root =
      Url::parse(origin).map_err(|e| eyre!("Invalid app origin {}: {}", origin, e))?;
    root.set_query(None);
    root.set_fragment(None);
    if !root.path().ends_with('/') {
      let path = format!("{}/", root.path());
      root.set_path(&path);
    }
    Ok(Self { root })
  }

  pub fn root(&self) -> &Url {
    &self.root
  }

  /// Resolve an asset path against the app root. Leading `/` and `./` are
  /// ignored so every asset stays inside the root.
  pub fn resolve(&self, asset: &str) -> Result<Url> {
    let relative = asset.trim_start_matches("./").trim_start_matches('/');
    self
      .root
      .join(relative)
      .map_err(|e| eyre!("Invalid asset path {}: {}", asset, e))
  }

  pub fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.root.origin()
  }

  /// URL for an incoming request target. Absolute-form targets (forward
  /// proxy use) are kept as-is; origin-form paths belong to the app origin
  /// and must start with exactly one `/`.
  pub fn request_url(&self, target: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(target) {
      return Ok(url);
    }
    if !target.starts_with('/') || target.starts_with("//") {
      return Err(eyre!("Invalid request target {}", target));
    }
    self
      .root
      .join(target)
      .map_err(|e| eyre!("Invalid request target {}: {}", target, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_root_gets_trailing_slash() {
    let scope = Scope::new("https://example.com/tt").unwrap();
    assert_eq!(scope.root().as_str(), "https://example.com/tt/");
  }

  #[test]
  fn test_resolve_assets_under_root() {
    let scope = Scope::new("https://example.com/tt/").unwrap();
    assert_eq!(
      scope.resolve("app.js").unwrap().as_str(),
      "https://example.com/tt/app.js"
    );
    assert_eq!(
      scope.resolve("./images/icon.png").unwrap().as_str(),
      "https://example.com/tt/images/icon.png"
    );
    assert_eq!(
      scope.resolve("/app").unwrap().as_str(),
      "https://example.com/tt/app"
    );
  }

  #[test]
  fn test_same_origin() {
    let scope = Scope::new("https://example.com/tt/").unwrap();
    assert!(scope.is_same_origin(&Url::parse("https://example.com/other").unwrap()));
    assert!(!scope.is_same_origin(&Url::parse("http://example.com/tt/").unwrap()));
    assert!(!scope.is_same_origin(&Url::parse("https://cdn.example.com/tt/").unwrap()));
  }

  #[test]
  fn test_request_url_forms() {
    let scope = Scope::new("https://example.com/tt/").unwrap();
    assert_eq!(
      scope.request_url("/tt/app?x=1").unwrap().as_str(),
      "https://example.com/tt/app?x=1"
    );
    assert_eq!(
      scope.request_url("https://fonts.example.org/a.woff2").unwrap().as_str(),
      "https://fonts.example.org/a.woff2"
    );
  }

  #[test]
  fn test_request_url_stays_on_origin() {
    let scope = Scope::new("https://example.com/tt/").unwrap();
    assert!(scope.request_url("//other.host/x").is_err());
    assert!(scope.request_url("other.host/x").is_err());
    assert_eq!(
      scope.request_url("/x").unwrap().origin(),
      scope.root().origin()
    );
  }
}
