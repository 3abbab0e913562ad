//! Startup-script assembly.
//!
//! Every instance the autoscaler creates boots with a script made of three
//! parts:
//!
//! ```text
//! #!/bin/bash                                  <- user shebang, or default
//! # >>> datacrunch-autoscaler preamble >>>
//! ...token exchange...
//! ...self-deletion of the stored script...     <- only with delete-after-boot
//! ...INSTANCE_ID / PROVIDER_ID resolution...
//! # <<< datacrunch-autoscaler preamble <<<
//! ...user script body...
//! ```
//!
//! The stored script carries API credentials, so with delete-after-boot the
//! instance removes every stored script with its own name as soon as it
//! boots. `INSTANCE_ID` is always exported so the user script can register
//! the kubelet with provider id `datacrunch://$INSTANCE_ID`.
//!
//! [`assemble`] is a pure function of its inputs. An input that already
//! contains an assembled preamble has it replaced, so assembling twice yields
//! the same bytes as assembling once.

mod source;

pub use source::{resolve_script, ScriptError};

/// First line of the injected preamble.
pub const PREAMBLE_BEGIN: &str = "# >>> datacrunch-autoscaler preamble >>>";

/// Last line of the injected preamble.
pub const PREAMBLE_END: &str = "# <<< datacrunch-autoscaler preamble <<<";

/// Interpreter used when the user script has no shebang.
pub const DEFAULT_SHEBANG: &str = "#!/bin/bash";

const TOKEN_SECTION: &str = r#"DATACRUNCH_API_URL={{API_URL}}
DATACRUNCH_CLIENT_ID={{CLIENT_ID}}
DATACRUNCH_CLIENT_SECRET={{CLIENT_SECRET}}
DATACRUNCH_ACCESS_TOKEN="$(jq -n --arg id "$DATACRUNCH_CLIENT_ID" --arg secret "$DATACRUNCH_CLIENT_SECRET" \
    '{grant_type: "client_credentials", client_id: $id, client_secret: $secret}' \
  | curl -fsS -X POST "$DATACRUNCH_API_URL/oauth2/token" -H 'Content-Type: application/json' -d @- \
  | jq -r '.access_token')"
unset DATACRUNCH_CLIENT_ID DATACRUNCH_CLIENT_SECRET
"#;

const DELETE_SECTION: &str = r#"DATACRUNCH_SCRIPT_NAME={{SCRIPT_NAME}}
for script_id in $(curl -fsS "$DATACRUNCH_API_URL/scripts" -H "Authorization: Bearer $DATACRUNCH_ACCESS_TOKEN" \
    | jq -r --arg name "$DATACRUNCH_SCRIPT_NAME" '.[] | select(.name == $name) | .id'); do
  jq -n --arg id "$script_id" '{scripts: [$id]}' \
    | curl -fsS -X DELETE "$DATACRUNCH_API_URL/scripts" \
        -H "Authorization: Bearer $DATACRUNCH_ACCESS_TOKEN" -H 'Content-Type: application/json' -d @- >/dev/null
done
unset DATACRUNCH_SCRIPT_NAME
"#;

const INSTANCE_ID_SECTION: &str = r#"INSTANCE_ID="$(curl -fsS "$DATACRUNCH_API_URL/instances" -H "Authorization: Bearer $DATACRUNCH_ACCESS_TOKEN" \
  | jq -r --arg host "$(hostname)" '.[] | select(.hostname == $host) | .id' | head -n 1)"
export INSTANCE_ID
export PROVIDER_ID="datacrunch://$INSTANCE_ID"
unset DATACRUNCH_ACCESS_TOKEN
"#;

/// Values substituted into the preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preamble {
    /// API base URL reachable from the instance.
    pub api_url: String,

    /// OAuth2 client id used by the instance.
    pub client_id: String,

    /// OAuth2 client secret used by the instance.
    pub client_secret: String,
}

impl Preamble {
    pub fn new(
        api_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Render the preamble block, markers included.
    pub fn render(&self, delete_after_boot: bool, script_name: &str) -> String {
        let mut block = String::new();
        block.push_str(PREAMBLE_BEGIN);
        block.push('\n');
        block.push_str(
            &TOKEN_SECTION
                .replace("{{API_URL}}", &shell_quote(&self.api_url))
                .replace("{{CLIENT_ID}}", &shell_quote(&self.client_id))
                .replace("{{CLIENT_SECRET}}", &shell_quote(&self.client_secret)),
        );
        if delete_after_boot {
            block.push_str(&DELETE_SECTION.replace("{{SCRIPT_NAME}}", &shell_quote(script_name)));
        }
        block.push_str(INSTANCE_ID_SECTION);
        block.push_str(PREAMBLE_END);
        block.push('\n');
        block
    }
}

/// Build the final boot script.
///
/// `script_name` is the name the script will be stored under; it is only
/// embedded when `delete_after_boot` is set.
pub fn assemble(
    user_script: &str,
    preamble: &Preamble,
    delete_after_boot: bool,
    script_name: &str,
) -> String {
    let body = strip_preamble(user_script);
    let (shebang, rest) = split_shebang(&body);

    let mut script = String::with_capacity(body.len() + 2048);
    script.push_str(shebang);
    script.push('\n');
    script.push_str(&preamble.render(delete_after_boot, script_name));
    script.push_str(rest);
    if !script.ends_with('\n') {
        script.push('\n');
    }
    script
}

/// Returns true if the script already contains an assembled preamble.
pub fn has_preamble(script: &str) -> bool {
    preamble_span(script).is_some()
}

/// Remove an assembled preamble block, if any.
fn strip_preamble(script: &str) -> String {
    match preamble_span(script) {
        Some((start, end)) => {
            let mut stripped = String::with_capacity(script.len());
            stripped.push_str(&script[..start]);
            stripped.push_str(&script[end..]);
            stripped
        }
        None => script.to_string(),
    }
}

/// Byte range covering the BEGIN line through the END line, inclusive of the
/// END line's newline.
fn preamble_span(script: &str) -> Option<(usize, usize)> {
    let mut offset = 0;
    let mut start = None;

    for line in script.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        match start {
            None if trimmed == PREAMBLE_BEGIN => start = Some(offset),
            Some(begin) if trimmed == PREAMBLE_END => {
                return Some((begin, offset + line.len()));
            }
            _ => {}
        }
        offset += line.len();
    }
    None
}

fn split_shebang(script: &str) -> (&str, &str) {
    if !script.starts_with("#!") {
        return (DEFAULT_SHEBANG, script);
    }

    match script.split_once('\n') {
        Some((shebang, rest)) => (shebang.trim_end_matches('\r'), rest),
        None => (script, ""),
    }
}

/// Quote a value for safe interpolation into a POSIX shell script.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'\''"#))
}
