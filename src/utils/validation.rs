//! 输入验证工具函数
//!
//! 动态列名会被拼进 DDL/DML 语句，这里集中校验，防止SQL注入和无效输入

/// 列名允许的最大长度（字符数）
pub const MAX_COLUMN_NAME_CHARS: usize = 64;

/// 验证动态字段名是否可作为列名
///
/// # 返回
/// - `Ok(())`: 验证通过
/// - `Err(String)`: 错误信息
pub fn validate_column_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("字段名不能为空".to_string());
    }
    if name != name.trim() {
        return Err(format!("字段名首尾不能有空白: {:?}", name));
    }
    if name.chars().count() > MAX_COLUMN_NAME_CHARS {
        return Err(format!("字段名过长: {}", name));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(format!("字段名包含控制字符: {:?}", name));
    }
    Ok(())
}

/// 验证仓库ID是否有效
pub fn validate_warehouse_id(id: i64) -> Result<(), String> {
    if id < 0 {
        return Err(format!("无效的仓库 ID: {}", id));
    }
    Ok(())
}

/// 为 SQLite 标识符加双引号
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
