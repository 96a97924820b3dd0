use anyhow::Result;
use std::path::Path;

use crate::config::CONFIG_FILENAME;

pub fn run() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let config_path = cwd.join(CONFIG_FILENAME);

    if config_path.exists() {
        anyhow::bail!("{} already exists in {}", CONFIG_FILENAME, cwd.display());
    }

    let project_name = cwd
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "my-project".to_string());

    let layout = detect_layout(&cwd);
    std::fs::write(&config_path, starter_config(&project_name, &layout))?;

    println!("Created {} in {}", CONFIG_FILENAME, cwd.display());
    println!();
    println!("  Project:  {}", project_name);
    println!("  backend:  {} (port 5050)", layout.backend_path);
    println!("  frontend: {} (port 5173)", layout.frontend_path);
    println!();
    println!("Edit the file, then run `portrig` to open the menu.");
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct Layout {
    backend_path: &'static str,
    frontend_path: &'static str,
}

/// Sibling `backend`/`frontend` directories are the common layout; fall back
/// to subdirectories of the current one.
fn detect_layout(dir: &Path) -> Layout {
    let sibling = |name: &str| dir.parent().map(|p| p.join(name).is_dir()).unwrap_or(false);
    if dir.join("backend").is_dir() || dir.join("frontend").is_dir() {
        Layout {
            backend_path: "./backend",
            frontend_path: "./frontend",
        }
    } else if sibling("backend") || sibling("frontend") {
        Layout {
            backend_path: "../backend",
            frontend_path: "../frontend",
        }
    } else {
        Layout {
            backend_path: "./backend",
            frontend_path: "./frontend",
        }
    }
}

fn starter_config(project_name: &str, layout: &Layout) -> String {
    let backend = layout.backend_path;
    let frontend = layout.frontend_path;
    format!(
        r#"[project]
name = "{project_name}"

# -- Timing --
# All optional; defaults shown.
# [timing]
# kill_wait = "1500ms"      # delay between eviction attempts
# start_wait = "1200ms"     # settle before checking the port after a start
# graceful_wait = "2s"      # our own process: interrupt -> tree kill
# term_grace = "1s"         # SIGTERM -> SIGKILL
# max_kill_attempts = 5
# query_timeout = "3s"      # lsof / ss / netstat

# -- Leftover sweep on restart and exit --
# Processes whose executable or script name matches are terminated.
# [sweep]
# enabled = true
# names = ["node.exe", "node", "server.js", "vite", "npm.exe", "npm"]

[services.backend]
path = "{backend}"
command = "node server.js"
port = 5050

[services.frontend]
path = "{frontend}"
command = "npm run preview -- --port 5173 --strictPort"
port = 5173
env = {{ NODE_ENV = "production" }}

# Build before every start and refuse to serve a development bundle.
[services.frontend.build]
command = "npm run build"
output_dir = "dist"
entry = "index.html"
timeout = "20m"
env = {{ NODE_ENV = "production" }}
# dev_markers = ["@vite/client", "@react-refresh", "/src/", "vite-plugin-pwa", "@vite-plugin-pwa"]
"#
    )
}
