use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use coordinator::common::{init_logging, start_application};
use coordinator_core::{AppConfig, LogFormat, LogLevel};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("coordinator")
        .version("1.0.0")
        .about("浏览器测试Worker轮询调度协调服务")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时按默认路径查找"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDR")
                .help("HTTP监听地址，覆盖配置文件"),
        )
        .arg(
            Arg::new("database-url")
                .long("database-url")
                .value_name("URL")
                .help("存储连接串（memory:// 或 sqlite:），覆盖配置文件"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mut config = AppConfig::load(config_path.map(String::as_str))
        .with_context(|| format!("加载配置失败: {}", config_path.map_or("<默认>", String::as_str)))?;
    apply_overrides(&mut config, &matches)?;
    config.validate()?;

    init_logging(config.observability.log_level, config.observability.log_format)?;

    info!("启动浏览器测试协调服务");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    start_application(config).await?;

    info!("协调服务已退出");
    Ok(())
}

/// 命令行参数优先于配置文件和环境变量
fn apply_overrides(config: &mut AppConfig, matches: &ArgMatches) -> Result<()> {
    if let Some(bind) = matches.get_one::<String>("bind") {
        config.api.bind_address = bind.clone();
    }
    if let Some(url) = matches.get_one::<String>("database-url") {
        config.database.url = url.clone();
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.parse::<LogLevel>()?;
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.parse::<LogFormat>()?;
    }
    Ok(())
}
