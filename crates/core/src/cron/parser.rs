use crate::errors::{SecronError, SecronResult};

/// 各字段的取值范围，按表达式字段顺序排列
pub(crate) const FIELD_RANGES: [(i64, i64); 7] = [
    (0, 59),      // 秒
    (0, 59),      // 分
    (0, 23),      // 时
    (1, 31),      // 日
    (1, 12),      // 月
    (0, 6),       // 周 (0=周日)
    (1970, 2099), // 年 (可选)
];

const MONTH_NAMES: [(&str, i64); 12] = [
    ("JAN", 1),
    ("FEB", 2),
    ("MAR", 3),
    ("APR", 4),
    ("MAY", 5),
    ("JUN", 6),
    ("JUL", 7),
    ("AUG", 8),
    ("SEP", 9),
    ("OCT", 10),
    ("NOV", 11),
    ("DEC", 12),
];

const WEEK_NAMES: [(&str, i64); 7] = [
    ("SUN", 0),
    ("MON", 1),
    ("TUE", 2),
    ("WED", 3),
    ("THU", 4),
    ("FRI", 5),
    ("SAT", 6),
];

fn invalid(expr: &str, message: impl Into<String>) -> SecronError {
    SecronError::InvalidCron {
        expr: expr.to_string(),
        message: message.into(),
    }
}

/// 将月份和星期名称替换为数字
fn replace_names(field: &str) -> String {
    let mut field = field.to_uppercase();
    for (name, num) in MONTH_NAMES.iter().chain(WEEK_NAMES.iter()) {
        if field.contains(name) {
            field = field.replace(name, &num.to_string());
        }
    }
    field
}

fn parse_int(expr: &str, token: &str) -> SecronResult<i64> {
    token
        .trim()
        .parse::<i64>()
        .map_err(|_| invalid(expr, format!("无法解析数值: {token}")))
}

/// 解析单个字段，返回去重排序后的允许值集合
///
/// 越界的单个字面量被静默丢弃，范围则被裁剪到字段的合法区间。
pub(crate) fn parse_field(expr: &str, field: &str, min: i64, max: i64) -> SecronResult<Vec<i64>> {
    if field == "*" || field == "?" {
        return Ok((min..=max).collect());
    }

    let field = replace_names(field);
    let mut values: Vec<i64> = Vec::new();

    for part in field.split(',') {
        let part = part.trim();
        if part == "*" || part == "?" {
            values.extend(min..=max);
        } else if part.contains('-') {
            values.extend(parse_range(expr, part, min, max)?);
        } else if part.contains('/') {
            values.extend(parse_step(expr, part, min, max)?);
        } else {
            let value = parse_int(expr, part)?;
            if value >= min && value <= max {
                values.push(value);
            }
        }
    }

    values.sort_unstable();
    values.dedup();
    Ok(values)
}

/// 解析范围表达式 (如 1-5、1-10/2)
fn parse_range(expr: &str, part: &str, min: i64, max: i64) -> SecronResult<Vec<i64>> {
    let (start, rest) = part
        .split_once('-')
        .ok_or_else(|| invalid(expr, format!("无效的范围表达式: {part}")))?;
    let start = parse_int(expr, start)?;

    let (end, step) = match rest.split_once('/') {
        Some((end, step)) => (parse_int(expr, end)?, parse_int(expr, step)?),
        None => (parse_int(expr, rest)?, 1),
    };
    if step <= 0 {
        return Err(invalid(expr, format!("步长必须为正数: {part}")));
    }

    Ok(stepped(start.max(min), end.min(max), step))
}

/// 解析步长表达式 (如 */5、1-10/2、5/2)
fn parse_step(expr: &str, part: &str, min: i64, max: i64) -> SecronResult<Vec<i64>> {
    let (base, step) = part
        .split_once('/')
        .ok_or_else(|| invalid(expr, format!("无效的步长表达式: {part}")))?;
    let step = parse_int(expr, step)?;
    if step <= 0 {
        return Err(invalid(expr, format!("步长必须为正数: {part}")));
    }

    let (start, end) = if base == "*" {
        (min, max)
    } else if let Some((s, e)) = base.split_once('-') {
        (parse_int(expr, s)?, parse_int(expr, e)?)
    } else {
        (parse_int(expr, base)?, max)
    };

    Ok(stepped(start.max(min), end.min(max), step))
}

fn stepped(start: i64, end: i64, step: i64) -> Vec<i64> {
    let mut values = Vec::new();
    let mut i = start;
    while i <= end {
        values.push(i);
        i += step;
    }
    values
}

/// 拆分表达式并解析全部字段
pub(crate) fn parse_fields(expression: &str) -> SecronResult<Vec<Vec<i64>>> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 6 && fields.len() != 7 {
        return Err(invalid(
            expression,
            format!("期望6或7个字段，实际为{}个", fields.len()),
        ));
    }

    fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let (min, max) = FIELD_RANGES[i];
            parse_field(expression, field, min, max)
        })
        .collect()
}
