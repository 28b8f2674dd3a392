use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::ValueEnum;

/// Template flavour for `reqchain scaffold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScaffoldType {
    Http,
    Grpc,
    Repeat,
    Mixed,
}

impl ScaffoldType {
    fn as_str(self) -> &'static str {
        match self {
            ScaffoldType::Http => "http",
            ScaffoldType::Grpc => "grpc",
            ScaffoldType::Repeat => "repeat",
            ScaffoldType::Mixed => "mixed",
        }
    }

    fn template(self) -> &'static str {
        match self {
            ScaffoldType::Http => HTTP_TEMPLATE,
            ScaffoldType::Grpc => GRPC_TEMPLATE,
            ScaffoldType::Repeat => REPEAT_TEMPLATE,
            ScaffoldType::Mixed => MIXED_TEMPLATE,
        }
    }
}

/// Run the scaffold command. Returns the path written.
pub fn run(kind: ScaffoldType, output: Option<&Path>) -> Result<PathBuf> {
    let path = target_path(kind, output);
    if path.exists() {
        bail!("File already exists: {}", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(&path, kind.template())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Created {} chain template: {}", kind.as_str(), path.display());
    println!();
    println!("Next steps:");
    println!("  1. Point the URLs at your service");
    println!("  2. reqchain run {}", path.display());
    Ok(path)
}

/// `./<type>_config.chain` by default; a directory gets that file name and a
/// path without an extension gets `.chain`.
fn target_path(kind: ScaffoldType, output: Option<&Path>) -> PathBuf {
    let file_name = format!("{}_config.chain", kind.as_str());
    match output {
        None => PathBuf::from(file_name),
        Some(dir) if dir.is_dir() => dir.join(file_name),
        Some(path) if path.extension().is_none() => path.with_extension("chain"),
        Some(path) => path.to_path_buf(),
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

const HTTP_TEMPLATE: &str = r#"# HTTP request chain.
# Later records read earlier ones through {RESPONSE id=N [none|json:path]}
# and {COOKIES id=N}, where N is the position of the record (from 0).
[login]
Type:http
URL:https://httpbin.org/post
Method:POST
Headers:`
{
  Content-Type: application/json
}
`
Body:`
{"user": "admin", "password": "secret"}
`
[\login]

[profile]
Type:http
URL:https://httpbin.org/get?user={RESPONSE id=0 json:json.user}
Method:GET
Headers:Cookie: {COOKIES id=0}
[\profile]
"#;

const GRPC_TEMPLATE: &str = r#"# gRPC request declaration.
[health]
Type:grpc
Target:localhost:50051
Endpoint:grpc.health.v1.Health/Check
Data:{"service": ""}
Metadata:authorization: Bearer token
Proto_Path:protos/health.proto
[\health]
"#;

const REPEAT_TEMPLATE: &str = r#"# A repeat re-sends an earlier record with some fields replaced.
[search]
Type:http
URL:https://httpbin.org/get?page=1
Method:GET
[\search]

[next_page]
Type:repeat
Target_ID:0
Replace:{"url": "https://httpbin.org/get?page=2"}
[\next_page]
"#;

const MIXED_TEMPLATE: &str = r#"# HTTP, gRPC and repeat records in one chain.
[login]
Type:http
URL:https://httpbin.org/post
Method:POST
Headers:Content-Type: application/json
Body:{"user": "admin"}
[\login]

[lookup]
Type:grpc
Target:localhost:50051
Endpoint:users.Users/Get
Data:{"name": "{RESPONSE id=0 json:json.user}"}
[\lookup]

[login_again]
Type:repeat
Target_ID:0
Replace:{"body": "{\"user\": \"guest\"}"}
[\login_again]
"#;
