//! 操作员控制台命令
//!
//! 控制台每行一条命令，解析后作为 `StationEvent::Operator` 送入控制线程：
//! - 工作流：input / use / save / print / set
//! - 设备与配置：warehouse / scale / scan / weigh
//! - 数据：export
//! - 其他：wifi / status / help / quit

use crate::peripherals::WeightSample;
use crate::storage::ExportKind;
use crate::utils::validate_column_name;
use std::path::PathBuf;

/// 控制台命令
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Input,
    Use,
    Save,
    Print,
    /// 修改录入字段
    Set { field: String, value: String },
    /// 切换仓库编号
    Warehouse(i64),
    /// 设置电子秤串口
    Scale { port: String, baud_rate: Option<u32> },
    /// 手工输入扫码内容
    Scan(String),
    /// 手工输入电子秤读数
    Weigh(WeightSample),
    Export { kind: ExportKind, path: PathBuf },
    WifiList,
    WifiSet { network: String, secret: String },
    WifiRemove(String),
    Status,
    Help,
    Quit,
}

pub const HELP_TEXT: &str = "\
可用命令:
  input                         识别当前画面并进入录入
  use                           进入使用模式（扫码 + 称重）
  save                          保存当前录入或使用记录
  print                         打印最近一次录入的二维码标签
  set <字段> <值>               修改录入字段，值为空则清除
  warehouse <编号>              切换仓库编号
  scale <串口> [波特率]         设置电子秤串口
  scan <内容>                   手工输入二维码内容
  weigh <读数>                  手工输入电子秤读数
  export records|history|latest <路径>
  wifi list | wifi set <网络> <密码> | wifi remove <网络>
  status                        显示当前状态
  help                          显示本帮助
  quit                          退出";

/// 解析一行命令；空行返回 Ok(None)
pub fn parse_command(line: &str) -> Result<Option<OperatorCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    let command = match name.to_ascii_lowercase().as_str() {
        "input" | "录入" => OperatorCommand::Input,
        "use" | "使用" => OperatorCommand::Use,
        "save" | "保存" => OperatorCommand::Save,
        "print" | "打印" => OperatorCommand::Print,
        "set" => {
            let (field, value) = match rest.split_once(char::is_whitespace) {
                Some((field, value)) => (field, value.trim()),
                None => (rest, ""),
            };
            validate_column_name(field).map_err(|e| format!("字段名无效: {}", e))?;
            OperatorCommand::Set {
                field: field.to_string(),
                value: value.to_string(),
            }
        }
        "warehouse" => {
            let id = args
                .first()
                .and_then(|v| v.parse::<i64>().ok())
                .ok_or("用法: warehouse <编号>")?;
            OperatorCommand::Warehouse(id)
        }
        "scale" => {
            let port = args.first().ok_or("用法: scale <串口> [波特率]")?;
            let baud_rate = match args.get(1) {
                Some(v) => Some(v.parse::<u32>().map_err(|_| format!("波特率无效: {}", v))?),
                None => None,
            };
            OperatorCommand::Scale {
                port: port.to_string(),
                baud_rate,
            }
        }
        "scan" => {
            if rest.is_empty() {
                return Err("用法: scan <内容>".to_string());
            }
            OperatorCommand::Scan(rest.to_string())
        }
        "weigh" => {
            let sample = args
                .first()
                .and_then(|v| WeightSample::parse(v))
                .ok_or("用法: weigh <读数>")?;
            OperatorCommand::Weigh(sample)
        }
        "export" => {
            let (kind, path) = match args.as_slice() {
                [kind, path, ..] => (kind.parse::<ExportKind>().map_err(|e| e.to_string())?, path),
                _ => return Err("用法: export records|history|latest <路径>".to_string()),
            };
            OperatorCommand::Export {
                kind,
                path: PathBuf::from(*path),
            }
        }
        "wifi" => match args.as_slice() {
            ["list"] | [] => OperatorCommand::WifiList,
            ["set", network, secret, ..] => OperatorCommand::WifiSet {
                network: network.to_string(),
                secret: secret.to_string(),
            },
            ["remove", network] => OperatorCommand::WifiRemove(network.to_string()),
            _ => return Err("用法: wifi list | wifi set <网络> <密码> | wifi remove <网络>".to_string()),
        },
        "status" => OperatorCommand::Status,
        "help" | "?" => OperatorCommand::Help,
        "quit" | "exit" => OperatorCommand::Quit,
        other => return Err(format!("未知命令: {}，输入 help 查看帮助", other)),
    };

    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(line: &str) -> OperatorCommand {
        parse_command(line).unwrap().unwrap()
    }

    #[test]
    fn test_parse_workflow_commands() {
        assert_eq!(parse("input"), OperatorCommand::Input);
        assert_eq!(parse("  USE "), OperatorCommand::Use);
        assert_eq!(parse("保存"), OperatorCommand::Save);
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_set_keeps_spaces_in_value() {
        assert_eq!(
            parse("set 名称 L-Lysine monohydrate"),
            OperatorCommand::Set {
                field: "名称".to_string(),
                value: "L-Lysine monohydrate".to_string(),
            }
        );
        assert_eq!(
            parse("set lot"),
            OperatorCommand::Set {
                field: "lot".to_string(),
                value: String::new(),
            }
        );
        assert!(parse_command("set").is_err());
    }

    #[test]
    fn test_parse_device_commands() {
        assert_eq!(parse("warehouse 3"), OperatorCommand::Warehouse(3));
        assert!(parse_command("warehouse x").is_err());
        assert_eq!(
            parse("scale /dev/ttyUSB0 4800"),
            OperatorCommand::Scale {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: Some(4800),
            }
        );
        assert_eq!(parse("scan 1:12"), OperatorCommand::Scan("1:12".to_string()));
        assert_eq!(parse("weigh 20.5"), OperatorCommand::Weigh(WeightSample::new(20.5, 1)));
        assert!(parse_command("weigh abc").is_err());
    }

    #[test]
    fn test_parse_export_and_wifi() {
        assert_eq!(
            parse("export history out/h.csv"),
            OperatorCommand::Export {
                kind: ExportKind::History,
                path: PathBuf::from("out/h.csv"),
            }
        );
        assert!(parse_command("export excel a.csv").is_err());
        assert_eq!(parse("wifi"), OperatorCommand::WifiList);
        assert_eq!(
            parse("wifi set lab pass"),
            OperatorCommand::WifiSet {
                network: "lab".to_string(),
                secret: "pass".to_string(),
            }
        );
        assert_eq!(parse("wifi remove lab"), OperatorCommand::WifiRemove("lab".to_string()));
    }

    #[test]
    fn test_unknown_command() {
        assert!(parse_command("launch").unwrap_err().contains("未知命令"));
    }
}
