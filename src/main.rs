use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use mayfly::app::{App, AppConfig};
use mayfly::dispatcher::{Reply, RequestCtx};
use mayfly::error::HandlerError;
use mayfly::prefork;
use mayfly::views::ViewEngine;

#[derive(Parser)]
#[command(name = "mayfly")]
#[command(about = "Mayfly demo server", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: String,

    /// Directory served under /public, also holds the download file
    #[arg(long, default_value = "static_site")]
    static_dir: PathBuf,

    /// Template directory for views
    #[arg(long, default_value = "templates")]
    template_dir: PathBuf,

    /// Directory uploaded files are saved into
    #[arg(long, default_value = "target")]
    upload_dir: PathBuf,

    /// Serve from this process only instead of preforking workers
    #[arg(long, default_value_t = false)]
    no_prefork: bool,

    /// Worker processes when preforking (0 = one per cpu)
    #[arg(long, default_value_t = 0)]
    workers: usize,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct RegisterRequest {
    username: String,
    password: String,
    name: String,
}

fn hello_world(_ctx: &RequestCtx) -> Result<Reply, HandlerError> {
    Ok(Reply::text("Hello World"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if prefork::is_child() {
        println!("I'm child process");
    } else {
        println!("I'm parent process");
    }

    let five = Duration::from_secs(5);
    let config = AppConfig {
        read_timeout: Some(five),
        write_timeout: Some(five),
        idle_timeout: Some(five),
        prefork: !cli.no_prefork,
        workers: cli.workers,
        error_handler: Some(Arc::new(|_ctx, err| {
            Reply::text(format!("Error : {err}")).with_status(500)
        })),
        views: Some(ViewEngine::new(&cli.template_dir, ".html")),
        ..AppConfig::default()
    };

    let mut app = App::with_config(config);

    app.get("/", |_ctx| Ok(Reply::text("Hello World !!!!!")));

    app.get("/hello", |ctx| {
        let name = ctx.query_or("name", "Guest");
        Ok(Reply::text(format!("Hello {name}")))
    });

    app.get("/req", |ctx| {
        let first = ctx.header("firstname").unwrap_or_default();
        let last = ctx.cookie("lastname").unwrap_or_default();
        Ok(Reply::text(format!("Hello {first} {last}")))
    });

    app.get("/users/:userId/orders/:orderId", |ctx| {
        let user = ctx.param("userId").unwrap_or_default();
        let order = ctx.param("orderId").unwrap_or_default();
        Ok(Reply::text(format!("Order {order} from {user}")))
    });

    app.post("/hi", |ctx| {
        let name = ctx.form_value("name").unwrap_or_default();
        Ok(Reply::text(format!("Hi {name}")))
    });

    let upload_dir = cli.upload_dir.clone();
    app.post("/upload", move |ctx| {
        let form = ctx.multipart()?;
        let file = form
            .file("file")
            .ok_or_else(|| HandlerError::Message("missing file field".to_string()))?;
        file.save_to(&upload_dir)?;
        Ok(Reply::text("Upload Success"))
    });

    app.post("/login", |ctx| {
        let request: LoginRequest = ctx.bind_json()?;
        Ok(Reply::text(format!("Hi {}", request.username)))
    });

    app.post("/register", |ctx| {
        let request: RegisterRequest = ctx.bind()?;
        Ok(Reply::text(format!("Register Success {}", request.username)))
    });

    app.get("/user", |_ctx| {
        Ok(Reply::json(serde_json::json!({
            "username": "khan",
            "name": "Eko Khan",
        })))
    });

    let download_path = cli.static_dir.join("contoh.txt");
    app.get("/download", move |_ctx| {
        Reply::download(&download_path, "contoh.txt")
    });

    app.get("/err", |_ctx| Err("duar".into()));

    app.get("/view", |_ctx| {
        Ok(Reply::view(
            "index",
            serde_json::json!({
                "title": "Hello Title",
                "header": "Hello Header",
                "content": "Hello Content",
            }),
        ))
    });

    {
        let mut api = app.group("/api");
        api.get("/hello", hello_world);
        api.get("/world", hello_world);
    }
    {
        let mut web = app.group("/web");
        web.get("/hello", hello_world);
        web.get("/world", hello_world);
    }

    app.static_dir("/public", &cli.static_dir);

    app.listen(&cli.addr)
}
