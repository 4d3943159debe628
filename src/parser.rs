use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_until, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, map_res, opt, recognize, value},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use uuid::Uuid;

use crate::model::{Field, RecordId};
use crate::pipeline::LIVE_POSITION;
use crate::search::SearchQuery;
use crate::template::{TemplateField, TemplateId};
use crate::HistoryRetention;

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Put { id: Option<RecordId>, template: Option<TemplateId>, fields: Vec<Field> },
    Load { id: RecordId, position: i32 },
    Reload,
    Show,
    Pick { position: i32 },
    Template { title: String, fields: Vec<TemplateField> },
    Delete { id: RecordId },
    Compact(HistoryRetention),
    Search(SearchQuery),
    Help,
    Exit,
}

// --- BASIC PARSERS ---

fn parse_i32(input: &str) -> IResult<&str, i32> {
    map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| s.parse::<i32>())(input)
}

fn parse_u64(input: &str) -> IResult<&str, u64> {
    map_res(digit1, |s: &str| s.parse::<u64>())(input)
}

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, content) = take_until("\"")(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, content.to_string()))
}

fn parse_uuid(input: &str) -> IResult<&str, Uuid> {
    let (input, uuid_str) = take_while(|c: char| c.is_ascii_hexdigit() || c == '-')(input)?;
    match Uuid::parse_str(uuid_str) {
        Ok(uuid) => Ok((input, uuid)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))),
    }
}

/// UUID with optional single quotes: `'…'` or bare.
fn parse_quoted_uuid(input: &str) -> IResult<&str, Uuid> {
    delimited(opt(char('\'')), parse_uuid, opt(char('\'')))(input)
}

fn parse_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-')(input)
}

// --- HELPERS ---
fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where F: FnMut(&'a str) -> IResult<&'a str, O, E> {
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

// --- COMMAND PARSERS ---

/// `name="value"`, `name*="value"` for a protected field.
fn parse_assignment(input: &str) -> IResult<&str, Field> {
    let (input, name) = parse_name(input)?;
    let (input, protected) = map(opt(char('*')), |m| m.is_some())(input)?;
    let (input, _) = ws(char('='))(input)?;
    let (input, value) = parse_quoted_string(input)?;
    Ok((input, Field { name: name.to_string(), value, protected }))
}

/// `name`, `name*` (protected) or `name!` (hidden).
fn parse_template_field(input: &str) -> IResult<&str, TemplateField> {
    let (input, name) = parse_name(input)?;
    let (input, marker) = opt(alt((char('*'), char('!'))))(input)?;
    let mut field = TemplateField::new(name);
    match marker {
        Some('*') => field.protected = true,
        Some('!') => field.hidden = true,
        _ => {}
    }
    Ok((input, field))
}

fn parse_position(input: &str) -> IResult<&str, i32> {
    alt((value(LIVE_POSITION, tag_ci("LIVE")), parse_i32))(input)
}

fn parse_put(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("PUT")(input)?;
    let (input, id) = opt(preceded(multispace1, parse_quoted_uuid))(input)?;
    let (input, template) = opt(preceded(ws(tag_ci("TEMPLATE")), parse_quoted_uuid))(input)?;
    let (input, _) = ws(tag_ci("SET"))(input)?;
    let (input, fields) = separated_list0(ws(char(',')), parse_assignment)(input)?;

    Ok((input, Command::Put {
        id: id.map(RecordId),
        template: template.map(TemplateId),
        fields,
    }))
}

fn parse_load(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("LOAD")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, id) = parse_quoted_uuid(input)?;
    let (input, position) = opt(preceded(ws(tag_ci("AT")), parse_position))(input)?;
    Ok((input, Command::Load { id: RecordId(id), position: position.unwrap_or(LIVE_POSITION) }))
}

fn parse_reload(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("RELOAD"), tag_ci("REFRESH")))(input)?;
    Ok((input, Command::Reload))
}

fn parse_show(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("SHOW")(input)?;
    Ok((input, Command::Show))
}

fn parse_pick(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("PICK")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, position) = parse_i32(input)?;
    Ok((input, Command::Pick { position }))
}

fn parse_template(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("TEMPLATE")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, title) = parse_quoted_string(input)?;
    let (input, _) = ws(tag_ci("FIELDS"))(input)?;
    let (input, fields) = delimited(
        ws(char('[')),
        separated_list0(ws(char(',')), parse_template_field),
        ws(char(']')),
    )(input)?;
    Ok((input, Command::Template { title, fields }))
}

fn parse_delete(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("DELETE")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, id) = parse_quoted_uuid(input)?;
    Ok((input, Command::Delete { id: RecordId(id) }))
}

/// `COMPACT [KEEP n] [MAX_SIZE bytes]`; omitted budgets take the defaults.
fn parse_compact(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("COMPACT")(input)?;
    let (input, keep) = opt(preceded(tuple((multispace1, opt(ws(tag_ci("KEEP"))))), parse_u64))(input)?;
    let (input, max_size) = opt(preceded(ws(tag_ci("MAX_SIZE")), parse_u64))(input)?;

    let mut retention = HistoryRetention::default();
    if let Some(keep) = keep {
        retention.max_items = usize::try_from(keep).unwrap_or(usize::MAX);
    }
    if let Some(max_size) = max_size {
        retention.max_size = max_size;
    }
    Ok((input, Command::Compact(retention)))
}

/// `SEARCH "term" [MATCH CASE]`
fn parse_search(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("SEARCH")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, term) = parse_quoted_string(input)?;
    let (input, match_case) = opt(preceded(ws(tag_ci("MATCH")), tag_ci("CASE")))(input)?;

    let query = SearchQuery::new(term);
    Ok((input, Command::Search(if match_case.is_some() { query.match_case() } else { query })))
}

fn parse_help(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HELP")(input)?;
    Ok((input, Command::Help))
}

fn parse_exit(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("EXIT"), tag_ci("QUIT")))(input)?;
    Ok((input, Command::Exit))
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = alt((
        parse_put,
        parse_load,
        parse_reload,
        parse_show,
        parse_pick,
        parse_template,
        parse_delete,
        parse_compact,
        parse_search,
        parse_help,
        parse_exit,
    ))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder));
            }
            Ok(cmd)
        },
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context: String = e.input.chars().take(20).collect();
            let ellipsis = if e.input.chars().count() > 20 { "..." } else { "" };
            Err(format!("Invalid syntax near: '{}{}'", context, ellipsis))
        },
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "67e55044-10b1-426f-9247-bb680e5fe0c8";

    #[test]
    fn put_with_id_template_and_protected_field() {
        let tpl = "00000000-0000-0000-0000-0000000000aa";
        let cmd = parse_command(&format!("put '{ID}' TEMPLATE '{tpl}' SET title=\"Mail\", password*=\"hunter2\"")).unwrap();

        assert_eq!(cmd, Command::Put {
            id: Some(ID.parse().unwrap()),
            template: Some(tpl.parse().unwrap()),
            fields: vec![Field::new("title", "Mail"), Field::protected("password", "hunter2")],
        });
    }

    #[test]
    fn put_without_id_creates_new_record() {
        let cmd = parse_command("PUT SET url=\"https://example.org\"").unwrap();
        assert!(matches!(cmd, Command::Put { id: None, template: None, ref fields } if fields.len() == 1));
    }

    #[test]
    fn load_defaults_to_live_position() {
        assert_eq!(parse_command(&format!("LOAD {ID}")).unwrap(), Command::Load { id: ID.parse().unwrap(), position: -1 });
        assert_eq!(parse_command(&format!("load '{ID}' at 2")).unwrap(), Command::Load { id: ID.parse().unwrap(), position: 2 });
        assert_eq!(parse_command(&format!("LOAD '{ID}' AT LIVE")).unwrap(), Command::Load { id: ID.parse().unwrap(), position: -1 });
    }

    #[test]
    fn template_markers_set_protection_and_visibility() {
        let cmd = parse_command("TEMPLATE \"Card\" FIELDS [number, cvv*, issuer_code!]").unwrap();
        let Command::Template { title, fields } = cmd else { panic!("expected template") };

        assert_eq!(title, "Card");
        assert_eq!(fields, vec![
            TemplateField::new("number"),
            TemplateField::protected("cvv"),
            TemplateField::hidden("issuer_code"),
        ]);
    }

    #[test]
    fn session_commands() {
        assert_eq!(parse_command("reload").unwrap(), Command::Reload);
        assert_eq!(parse_command("SHOW").unwrap(), Command::Show);
        assert_eq!(parse_command("PICK 3").unwrap(), Command::Pick { position: 3 });
        assert_eq!(parse_command("COMPACT KEEP 4").unwrap(), Command::Compact(HistoryRetention::items(4)));
        assert_eq!(parse_command("COMPACT").unwrap(), Command::Compact(HistoryRetention::default()));
        assert_eq!(parse_command(&format!("DELETE '{ID}'")).unwrap(), Command::Delete { id: ID.parse().unwrap() });
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let err = parse_command("SHOW me everything").unwrap_err();
        assert!(err.starts_with("Unexpected tokens"));
        assert!(parse_command("LOAD not-a-uuid").is_err());
    }

    #[test]
    fn compact_budgets_cover_the_whole_range() {
        assert_eq!(
            parse_command("COMPACT KEEP 18446744073709551615 MAX_SIZE 1024").unwrap(),
            Command::Compact(HistoryRetention { max_items: usize::MAX, max_size: 1024 })
        );
        assert!(parse_command("COMPACT KEEP 18446744073709551616").is_err());
    }

    #[test]
    fn search_defaults_to_ignoring_case() {
        assert_eq!(parse_command("search \"Mail\"").unwrap(), Command::Search(SearchQuery::new("Mail")));
        assert_eq!(
            parse_command("SEARCH \"Mail\" MATCH CASE").unwrap(),
            Command::Search(SearchQuery::new("Mail").match_case())
        );
    }
}
