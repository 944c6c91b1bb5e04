// 试剂管理工作站命令行入口

use clap::Parser;
use reagent_station_lib::LaunchOptions;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "reagent-station")]
#[command(about = "化学试剂录入与使用记录工作站")]
#[command(version)]
struct Cli {
    /// 配置目录（settings.json、credentials.json）
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// 数据目录（记录库、参考库、日志）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 不打开串口和摄像头，扫码和称重使用 scan / weigh 命令手工输入
    #[arg(long)]
    no_peripherals: bool,

    /// 内部日志同时输出到标准输出
    #[arg(short, long)]
    verbose: bool,
}

/// `$XDG_DATA_HOME/reagent-station`，否则 `~/.local/share/reagent-station`
fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(dir).join("reagent-station");
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".local/share/reagent-station"),
        None => PathBuf::from("reagent-station-data"),
    }
}

fn main() {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let options = LaunchOptions {
        config_dir: cli.config_dir.unwrap_or_else(|| data_dir.clone()),
        data_dir,
        no_peripherals: cli.no_peripherals,
        echo_stdout: cli.verbose,
    };

    if let Err(e) = reagent_station_lib::run(options) {
        eprintln!("错误: {:#}", e);
        process::exit(1);
    }
}
