// 该文件是 Fukidashi （对白框） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use url::Url;

/// Fukidashi 对白框检测与修复
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 流水线配置文件（JSON），缺省时使用内置默认值
  #[arg(long, global = true, value_name = "FILE")]
  pub config: Option<PathBuf>,

  #[command(subcommand)]
  pub command: Command,
}

/// 模型来源与缓存
#[derive(ClapArgs, Debug)]
pub struct ModelArgs {
  /// 模型来源，例如 fragments:///srv/models
  #[arg(long, value_name = "SOURCE")]
  pub models: Url,

  /// 本地模型缓存，例如 cache:///var/cache/fukidashi，缺省时仅缓存在内存中
  #[arg(long, value_name = "CACHE")]
  pub cache: Option<Url>,

  /// 原生重建模块（共享库）路径，缺省时使用内置实现
  #[arg(long, value_name = "LIBRARY")]
  pub native: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 检测对白框与文字
  Detect {
    #[command(flatten)]
    models: ModelArgs,

    /// 输入页面，例如 image:///pages/ 或 image:///pages/001.png
    #[arg(long, value_name = "SOURCE")]
    input: Url,

    /// 结果输出，支持 json:///、image:/// 与 folder:///
    #[arg(long, value_name = "OUTPUT")]
    output: Url,
  },

  /// 按编辑记录修复页面
  Inpaint {
    #[command(flatten)]
    models: ModelArgs,

    /// 输入页面
    #[arg(long, value_name = "SOURCE")]
    input: Url,

    /// 编辑记录文件（JSON）
    #[arg(long, value_name = "FILE")]
    edits: PathBuf,

    /// 修复结果输出，支持 image:/// 与 folder:///
    #[arg(long, value_name = "OUTPUT")]
    output: Url,
  },

  /// 从分片重建模型并写入文件
  Reconstruct {
    #[command(flatten)]
    models: ModelArgs,

    /// 模型名称
    #[arg(long)]
    name: String,

    /// 重建结果路径
    #[arg(long, value_name = "FILE")]
    output: PathBuf,
  },

  /// 拆分模型并发布到模型目录
  Split {
    /// 模型文件
    #[arg(long, value_name = "FILE")]
    model: PathBuf,

    /// 发布的模型名称
    #[arg(long)]
    name: String,

    /// 目标模型目录，例如 fragments:///srv/models
    #[arg(long, value_name = "TARGET")]
    models: Url,
  },
}
