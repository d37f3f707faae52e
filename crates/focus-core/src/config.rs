use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use serde::{
  Deserialize,
  Serialize
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::error::InitializationError;

/// Environment-provided global holding the backend descriptor as JSON.
pub const BACKEND_CONFIG_ENV: &str =
  "FOCUS_BACKEND_CONFIG";

/// Keys the rc file may set. Anything else is
/// logged and ignored.
pub const KNOWN_KEYS: [&str; 4] = [
  "data.location",
  "color",
  "ui.interactive",
  "backend.config"
];

#[derive(Debug, Clone)]
pub struct Config {
  map:        HashMap<String, String>,
  pub source: Option<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let map = [
      ("data.location", "~/.focus"),
      ("color", "on"),
      ("ui.interactive", "on")
    ]
    .into_iter()
    .map(|(k, v)| {
      (k.to_string(), v.to_string())
    })
    .collect();

    Self {
      map,
      source: None
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    focusrc_override
  ))]
  pub fn load(
    focusrc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let Some(path) =
      focusrc_path(focusrc_override)?
    else {
      debug!(
        "no focusrc; using defaults"
      );
      return Ok(cfg);
    };

    let path = expand_tilde(&path);
    info!(focusrc = %path.display(), "loading focusrc");
    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "failed to read {}",
          path.display()
        )
      })?;
    for (key, value) in
      parse_rc(&text).with_context(
        || {
          format!(
            "in {}",
            path.display()
          )
        }
      )?
    {
      cfg.set(key, value);
    }
    cfg.source = Some(path);

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.set(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  fn set(
    &mut self,
    key: String,
    value: String
  ) {
    if !KNOWN_KEYS
      .contains(&key.as_str())
    {
      warn!(key = %key, "ignoring unknown setting");
      return;
    }
    trace!(key = %key, value = %value, "setting");
    self.map.insert(key, value);
  }
}

/// Parses `key = value` lines. Blank
/// lines and `#` comments are skipped.
fn parse_rc(
  text: &str
) -> anyhow::Result<Vec<(String, String)>>
{
  let mut out = Vec::new();
  for (idx, raw) in
    text.lines().enumerate()
  {
    let line = raw
      .split_once('#')
      .map_or(raw, |(before, _)| before)
      .trim();
    if line.is_empty() {
      continue;
    }

    let (k, v) = line
      .split_once('=')
      .ok_or_else(|| {
        anyhow!(
          "line {}: expected key = \
           value, got {raw:?}",
          idx + 1
        )
      })?;
    let key = k.trim();
    if key.is_empty() {
      return Err(anyhow!(
        "line {}: empty key",
        idx + 1
      ));
    }
    out.push((
      key.to_string(),
      v.trim().to_string()
    ));
  }
  Ok(out)
}

/// Connection descriptor for the task backend.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
  pub api_key:             String,
  #[serde(default)]
  pub auth_domain:         String,
  pub project_id:          String,
  #[serde(default)]
  pub storage_bucket:      String,
  #[serde(default)]
  pub messaging_sender_id: String,
  #[serde(default)]
  pub app_id:              String,
  #[serde(default)]
  pub measurement_id:      Option<String>
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      api_key:             "local-dev-key"
        .to_string(),
      auth_domain:         "localhost"
        .to_string(),
      project_id:          "focus-manager"
        .to_string(),
      storage_bucket:      String::new(),
      messaging_sender_id: String::new(),
      app_id:              "focus-local"
        .to_string(),
      measurement_id:      None
    }
  }
}

impl BackendConfig {
  /// Resolves the descriptor: the
  /// environment global, then the
  /// `backend.config` file, then the
  /// compiled-in fallback.
  #[tracing::instrument(skip(cfg))]
  pub fn resolve(
    cfg: &Config
  ) -> Result<Self, InitializationError>
  {
    let global =
      std::env::var(BACKEND_CONFIG_ENV)
        .ok();
    let file = cfg
      .get("backend.config")
      .map(|p| {
        expand_tilde(Path::new(&p))
      });
    Self::from_sources(
      global.as_deref(),
      file.as_deref()
    )
  }

  pub fn from_sources(
    global: Option<&str>,
    file: Option<&Path>
  ) -> Result<Self, InitializationError>
  {
    let parsed = if let Some(raw) =
      global
        .filter(|s| !s.trim().is_empty())
    {
      debug!(
        source = BACKEND_CONFIG_ENV,
        "using environment backend \
         config"
      );
      serde_json::from_str::<Self>(raw)?
    } else if let Some(path) = file {
      debug!(file = %path.display(), "using backend config file");
      let text = fs::read_to_string(
        path
      )
      .map_err(|source| {
        InitializationError::ConfigFile {
          path: path.to_path_buf(),
          source
        }
      })?;
      serde_json::from_str::<Self>(
        &text
      )?
    } else {
      debug!(
        "using built-in backend config"
      );
      Self::default()
    };

    parsed.validate()?;
    Ok(parsed)
  }

  pub fn validate(
    &self
  ) -> Result<(), InitializationError> {
    if self.api_key.trim().is_empty() {
      return Err(
        InitializationError::InvalidConfig(
          "apiKey is empty".to_string()
        )
      );
    }
    let project = self.project_id.trim();
    if project.is_empty() {
      return Err(
        InitializationError::InvalidConfig(
          "projectId is empty".to_string()
        )
      );
    }
    if project.contains(['/', '\\'])
      || project == "."
      || project == ".."
    {
      return Err(
        InitializationError::InvalidConfig(
          format!(
            "projectId is not a valid \
             name: {project}"
          )
        )
      );
    }
    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    home_dir()?.join(".focus")
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

/// `--focusrc`, then `$FOCUSRC`
/// (`/dev/null` disables), then
/// `~/.focusrc` when present.
fn focusrc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Some(env) =
    std::env::var_os("FOCUSRC")
  {
    return Ok(
      (env != "/dev/null")
        .then(|| PathBuf::from(env))
    );
  }

  let candidate =
    home_dir()?.join(".focusrc");
  Ok(candidate
    .exists()
    .then_some(candidate))
}

fn home_dir() -> anyhow::Result<PathBuf>
{
  dirs::home_dir().ok_or_else(|| {
    anyhow!(
      "cannot determine home directory"
    )
  })
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
