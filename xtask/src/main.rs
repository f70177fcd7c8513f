use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Bleprint 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建所有组件 (release)
    Build,
    /// 运行守护进程 (开发模式)
    Dev {
        /// 日志级别 (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "debug")]
        log_level: String,
    },
    /// 安装 systemd 用户服务
    Install,
    /// 卸载 systemd 用户服务
    Uninstall,
    /// 打包守护进程、CLI 和服务文件 (tar.gz)
    Dist,
    /// 运行测试
    Test {
        /// 只测试指定的包 (例如 bleprint-core)
        #[arg(short, long)]
        package: Option<String>,
        /// 测试名过滤
        filter: Option<String>,
    },
    /// 生成 bleprint-core 覆盖率报告 (不含 btleplug 后端)
    Coverage,
    /// 清理构建产物和打包目录
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // 确保在项目根目录执行
    let project_root = std::env::var("CARGO_MANIFEST_DIR")
        .map(PathBuf::from)
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .map_or_else(std::env::current_dir, Ok)?;
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Dev { log_level } => dev(&sh, &log_level)?,
        Commands::Install => install(&sh)?,
        Commands::Uninstall => uninstall(&sh)?,
        Commands::Dist => dist(&sh)?,
        Commands::Test { package, filter } => {
            test(&sh, package.as_deref(), filter.as_deref())?;
        }
        Commands::Coverage => coverage(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建所有组件...");
    cmd!(sh, "cargo build --release -p bleprint-daemon -p bleprint-cli").run()?;
    println!("✅ 构建完成");
    Ok(())
}

fn dev(sh: &Shell, log_level: &str) -> Result<()> {
    println!("🚀 启动开发模式守护进程...");
    println!("   日志级别: {}", log_level);

    let rust_log = format!("{log_level},bleprint_core={log_level},btleplug=info");
    cmd!(sh, "cargo run -p bleprint-daemon")
        .env("RUST_LOG", rust_log)
        .run()?;
    Ok(())
}

fn user_dirs() -> Result<(PathBuf, PathBuf)> {
    let home = std::env::var("HOME").context("HOME 未设置")?;
    let home = PathBuf::from(home);
    Ok((
        home.join(".local/bin"),
        home.join(".config/systemd/user"),
    ))
}

fn install(sh: &Shell) -> Result<()> {
    println!("📦 安装 Bleprint 服务...");

    // 构建
    build(sh)?;

    // 先停止已运行的服务（如果存在）
    println!("⏹️  停止现有服务...");
    let _ = cmd!(sh, "systemctl --user stop bleprint.service").run();

    // 等待进程完全退出
    std::thread::sleep(std::time::Duration::from_millis(500));

    let (bin_dir, unit_dir) = user_dirs()?;
    sh.create_dir(&bin_dir)?;
    sh.create_dir(&unit_dir)?;

    // 复制二进制文件
    println!("📋 复制二进制文件...");
    sh.copy_file("target/release/bleprint-daemon", &bin_dir)?;
    sh.copy_file("target/release/bleprint", &bin_dir)?;

    // 复制 systemd 服务文件
    sh.copy_file("assets/bleprint.service", &unit_dir)?;

    // 启用并启动服务
    cmd!(sh, "systemctl --user daemon-reload").run()?;
    cmd!(sh, "systemctl --user enable --now bleprint.service").run()?;

    println!("✅ 服务安装完成");
    println!("   使用 'bleprint --help' 查看命令");
    println!("   使用 'systemctl --user status bleprint' 查看服务状态");
    Ok(())
}

fn uninstall(sh: &Shell) -> Result<()> {
    println!("🗑️  卸载 Bleprint 服务...");

    // 停止并禁用服务
    let _ = cmd!(sh, "systemctl --user stop bleprint.service").run();
    let _ = cmd!(sh, "systemctl --user disable bleprint.service").run();

    // 删除文件
    let (bin_dir, unit_dir) = user_dirs()?;
    sh.remove_path(unit_dir.join("bleprint.service"))?;
    sh.remove_path(bin_dir.join("bleprint-daemon"))?;
    sh.remove_path(bin_dir.join("bleprint"))?;

    cmd!(sh, "systemctl --user daemon-reload").run()?;

    println!("✅ 卸载完成");
    Ok(())
}

/// 工作区版本号，取自守护进程包
fn workspace_version(sh: &Shell) -> Result<String> {
    let pkgid = cmd!(sh, "cargo pkgid -p bleprint-daemon").read()?;
    pkgid
        .rsplit(['@', '#'])
        .next()
        .map(str::to_owned)
        .context("无法解析版本号")
}

fn dist(sh: &Shell) -> Result<()> {
    println!("📦 打包发布...");

    build(sh)?;

    let version = workspace_version(sh)?;
    let dist_name = format!("bleprint-{version}-linux-{}", std::env::consts::ARCH);
    let staging = PathBuf::from("dist").join(&dist_name);

    // 每次重新生成，避免残留旧文件
    sh.remove_path(&staging)?;
    sh.create_dir(&staging)?;

    println!("📋 复制文件...");
    sh.copy_file("target/release/bleprint-daemon", &staging)?;
    sh.copy_file("target/release/bleprint", &staging)?;
    sh.copy_file("assets/bleprint.service", &staging)?;

    let archive = format!("{dist_name}.tar.gz");
    cmd!(sh, "tar -czf dist/{archive} -C dist {dist_name}").run()?;

    println!("✅ 打包完成: dist/{}", archive);
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>, filter: Option<&str>) -> Result<()> {
    let scope = match package {
        Some(name) => vec!["-p", name],
        None => vec!["--workspace"],
    };
    println!("🧪 运行测试 ({})...", package.unwrap_or("全部"));
    cmd!(sh, "cargo test {scope...} {filter...}").run()?;
    println!("✅ 测试完成");
    Ok(())
}

fn coverage(sh: &Shell) -> Result<()> {
    println!("📊 生成覆盖率报告...");

    if cmd!(sh, "cargo tarpaulin --version")
        .quiet()
        .ignore_stdout()
        .run()
        .is_err()
    {
        anyhow::bail!("未找到 cargo-tarpaulin，请先运行 'cargo install cargo-tarpaulin'");
    }

    // btleplug 后端需要真实适配器，测试中使用替身
    cmd!(
        sh,
        "cargo tarpaulin -p bleprint-core --exclude-files crates/bleprint-core/src/ble/btleplug_central.rs --out Html --output-dir target/coverage"
    )
    .run()?;

    println!("✅ 报告: target/coverage/tarpaulin-report.html");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    sh.remove_path("dist")?;
    sh.remove_path("target/coverage")?;
    println!("✅ 清理完成");
    Ok(())
}
