use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use tracker_query::{
    CatalogueProvider, CatalogueSet, CompilerConfig, Page, QueryError, SqlCompiler, TrackerId,
    ValueWrapperParameters,
};

const DEFAULT_CATALOGUE: &str = "demos/catalogue.json";
const DEFAULT_CONFIG: &str = "compiler.json";

/// 创建SQL编译器实例，优先使用JSON配置，失败时使用默认配置
fn create_compiler_with_config() -> SqlCompiler {
    if !Path::new(DEFAULT_CONFIG).exists() {
        return SqlCompiler::new();
    }
    match CompilerConfig::from_json_file(DEFAULT_CONFIG) {
        Ok(config) => match SqlCompiler::from_config(config) {
            Ok(compiler) => {
                println!("✅ 成功从JSON配置文件加载编译器配置");
                compiler
            }
            Err(e) => {
                println!("⚠️ 配置无效 ({}), 使用默认配置", e);
                SqlCompiler::new()
            }
        },
        Err(e) => {
            println!("⚠️ 无法加载JSON配置文件 ({}), 使用默认配置", e);
            SqlCompiler::new()
        }
    }
}

/// 解析 `.trackers 1,2,3` 的参数
fn parse_tracker_ids(args: &str) -> Result<Vec<TrackerId>> {
    args.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<TrackerId>().with_context(|| format!("无效的追踪器 id: {part}")))
        .collect()
}

fn print_help() {
    println!("输入专家查询即可编译, 例如: status() = OPEN() AND priority IN(\"High\")");
    println!("  .trackers <id,...>  设置查询的追踪器范围");
    println!("  .user <id>          设置 MYSELF() 对应的用户");
    println!("  .help               显示帮助");
    println!("  .quit               退出");
}

fn print_error(error: &QueryError) {
    println!("✗ [{} / {}] {}", error.code(), error.http_status(), error);
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    println!("--- Tracker Query: 专家查询到 SQL 编译器 ---");

    let catalogue_path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CATALOGUE.to_string());
    let catalogue = CatalogueSet::from_json_file(&catalogue_path)
        .with_context(|| format!("无法加载追踪器目录 {catalogue_path}"))?;
    println!("✅ 加载了 {} 个追踪器: {:?}", catalogue.len(), catalogue.tracker_ids());

    let compiler = create_compiler_with_config();
    let mut trackers = catalogue.tracker_ids();
    let mut current_user: i64 = 1;
    print_help();

    let mut rl = DefaultEditor::new().context("无法初始化行编辑器")?;
    loop {
        match rl.readline("query> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);

                if let Some(command) = trimmed.strip_prefix('.') {
                    let (name, args) = command.split_once(' ').unwrap_or((command, ""));
                    match name {
                        "quit" | "exit" => break,
                        "help" => print_help(),
                        "trackers" => match parse_tracker_ids(args) {
                            Ok(ids) => {
                                trackers = ids;
                                println!("追踪器范围: {:?}", trackers);
                            }
                            Err(e) => println!("✗ {e:#}"),
                        },
                        "user" => match args.trim().parse() {
                            Ok(id) => {
                                current_user = id;
                                println!("当前用户: {current_user}");
                            }
                            Err(_) => println!("✗ 无效的用户 id: {}", args.trim()),
                        },
                        _ => println!("✗ 未知命令 .{name}, 输入 .help 查看帮助"),
                    }
                    continue;
                }

                let parameters = ValueWrapperParameters::new(current_user, Utc::now());
                let compiled = catalogue
                    .resolve_scope(&trackers)
                    .and_then(|scope| compiler.compile(trimmed, &scope, &parameters));
                match compiled {
                    Ok(compiled) => {
                        let page = compiled.build_page(Page::new(None, None, compiler.config()));
                        println!("✅ 成功编译为 SQL");
                        println!("\n[生成的 SQL]:\n{}", page.sql);
                        println!("\n[绑定参数]:");
                        for (i, value) in page.values.0.iter().enumerate() {
                            println!("  {}: {:?}", i + 1, value);
                        }
                        println!("\n[调试 SQL]:\n{}\n", compiled.to_debug_sql());
                    }
                    Err(e) => print_error(&e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!();
            }
            Err(ReadlineError::Eof) => {
                println!("再见!");
                break;
            }
            Err(e) => {
                eprintln!("读取输入失败: {e}");
                break;
            }
        }
    }
    Ok(())
}
