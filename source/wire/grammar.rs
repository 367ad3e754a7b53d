// IMAP4rev1 command grammar (RFC 3501 §9), extended for the UIDPLUS (RFC 4315), MOVE
// (RFC 6851), ESEARCH/CONTEXT (RFC 4731/5267), SORT (RFC 5256) and LIST-EXTENDED/LIST-STATUS
// (RFC 5258/5819) productions this server advertises in CAPABILITY.
//
// Built the same way the teacher's response grammar in the original `imap.rs` is: a `peg::parser!`
// block with one rule per (commented) RFC production, deliberately collapsed where the RFC
// grammar's alternatives all resolve to the same Rust shape.

use super::types::*;
use std::borrow::Cow;

fn parse_number(n: &[u8]) -> u32 {
  std::str::from_utf8(n).unwrap().parse().unwrap()
}

fn parse_number64(n: &[u8]) -> u64 {
  std::str::from_utf8(n).unwrap().parse().unwrap()
}

peg::parser! {
  pub grammar parser() for [u8] {
    rule CR() = "\r"
    rule LF() = "\n"
    rule CRLF() = CR() LF()
    rule CHAR8() = [b'\x01'..=b'\xff']
    rule CTL() = [b'\x00'..=b'\x1f'] / "\x7f"
    rule DQUOTE() = "\""
    rule SP() = " "
    rule TEXT_CHAR() -> u8 = !(CR() / LF()) c:[_] { c }
    rule DIGIT() = [b'0'..=b'9']
    rule digit_nz() = [b'1'..=b'9']

    rule number() -> u32 = n:$(DIGIT()+) { parse_number(n) }
    rule number64() -> u64 = n:$(DIGIT()+) { parse_number64(n) }
    rule nz_number() -> u32 = n:$(digit_nz() DIGIT()*) { parse_number(n) }
    rule nz_number64() -> u64 = n:$(digit_nz() DIGIT()*) { parse_number64(n) }
    rule text() = TEXT_CHAR()+

    rule nil() = "NIL"
    rule list_wildcards() = "%" / "*"
    rule quoted_specials() -> u8 = c:(DQUOTE() { b'"' } / ("\\" { b'\\' })) { c }
    rule resp_specials() = "]"
    rule atom_specials() = "(" / ")" / "{" / SP() / CTL() / list_wildcards() / quoted_specials() / resp_specials()
    rule ATOM_CHAR() = !atom_specials() [b'\x01'..=b'\x7f']
    rule atom() = ATOM_CHAR()+
    rule ASTRING_CHAR() = ATOM_CHAR() / resp_specials()

    rule QUOTED_CHAR() -> u8
      = !quoted_specials() c:TEXT_CHAR() { c } / "\\" c:quoted_specials() { c }
    rule quoted() -> Vec<u8>
      = DQUOTE() q:(QUOTED_CHAR()*) DQUOTE() { q }
    // literal = "{" number ["+"] "}" CRLF *CHAR8(n). The reader already guarantees the bytes are
    // present; we just slice them here using the undocumented ##skip escape hatch the teacher
    // already relies on to avoid materializing a Vec for every literal.
    rule literal() -> &'input [u8]
      = "{" n:number() "+"? "}" CRLF() position!() l:$(##skip(n as usize))
      { l }
    rule string() -> Cow<'input, [u8]>
      = q:quoted() { Cow::Owned(q) } / l:literal() { Cow::Borrowed(l) }
    rule astring() -> Cow<'input, [u8]>
      = s:$(ASTRING_CHAR()+) { Cow::Borrowed(s) } / s:string() { s }
    rule nstring() -> Option<Cow<'input, [u8]>>
      = s:string() { Some(s) } / nil() { None }

    rule tag() -> &'input [u8] = $((!"+" ASTRING_CHAR())+)

    rule mailbox() -> MailboxName
      = i:$(("i"/"I")("n"/"N")("b"/"B")("o"/"O")("x"/"X")) !ASTRING_CHAR() { let _ = i; MailboxName::Inbox }
      / m:astring() { MailboxName::Other(m.into_owned()) }

    rule flag_keyword() -> &'input [u8] = $(atom())
    rule flag() -> Flag
      = "\\Answered"i { Flag::Standard(StandardFlag::Answered) }
      / "\\Flagged"i { Flag::Standard(StandardFlag::Flagged) }
      / "\\Deleted"i { Flag::Standard(StandardFlag::Deleted) }
      / "\\Seen"i { Flag::Standard(StandardFlag::Seen) }
      / "\\Draft"i { Flag::Standard(StandardFlag::Draft) }
      / "\\*" { Flag::Star }
      / "\\" k:flag_keyword() { Flag::Keyword(format!("\\{}", String::from_utf8_lossy(k))) }
      / k:flag_keyword() { Flag::Keyword(String::from_utf8_lossy(k).into_owned()) }

    rule flag_list() -> Vec<Flag> = "(" fs:(flag() ** SP()) ")" { fs }

    rule seq_number() -> Range = n:nz_number() { Range(n, n) } / "*" { Range(0, u32::MAX) }
    rule seq_range() -> Range
      = r1:seq_number() ":" r2:seq_number()
      { if r1.0 <= r2.1 { Range(r1.0, r2.1) } else { Range(r2.0, r1.0) } }
    rule sequence_set() -> SequenceSet = (seq_range() / seq_number()) ** ","

    rule date_day_month_year() -> Date
      = d:$(DIGIT()*<1,2>) "-" m:month() "-" y:$(DIGIT()*<4>)
      { Date::Ymd(std::str::from_utf8(y).unwrap().parse().unwrap(), m, std::str::from_utf8(d).unwrap().parse().unwrap()) }
    rule month() -> u32
      = "Jan"i {1} / "Feb"i {2} / "Mar"i {3} / "Apr"i {4} / "May"i {5} / "Jun"i {6}
      / "Jul"i {7} / "Aug"i {8} / "Sep"i {9} / "Oct"i {10} / "Nov"i {11} / "Dec"i {12}
    rule date() -> Date
      = DQUOTE() d:date_day_month_year() DQUOTE() { d } / date_day_month_year()

    // astring-ish free text used by SEARCH string arguments; a literal or quoted or plain atom.
    rule search_string() -> String
      = s:astring() { String::from_utf8_lossy(&s).into_owned() }

    rule search_key() -> SearchKey = precedence!{
      x:(@) SP() "OR" SP() y:(@) { SearchKey::Or(Box::new(x), Box::new(y)) }
      --
      "NOT"i SP() x:(@) { SearchKey::Not(Box::new(x)) }
      --
      "(" keys:(search_key() ** SP()) ")" {
        if keys.len() == 1 { keys.into_iter().next().unwrap() } else { SearchKey::And(keys) }
      }
      "ALL"i { SearchKey::All }
      "ANSWERED"i { SearchKey::Answered }
      "BCC"i SP() s:search_string() { SearchKey::Bcc(s) }
      "BEFORE"i SP() d:date() { SearchKey::Before(d) }
      "BODY"i SP() s:search_string() { SearchKey::Body(s) }
      "CC"i SP() s:search_string() { SearchKey::Cc(s) }
      "DELETED"i { SearchKey::Deleted }
      "DRAFT"i { SearchKey::Draft }
      "FLAGGED"i { SearchKey::Flagged }
      "FROM"i SP() s:search_string() { SearchKey::From(s) }
      "HEADER"i SP() f:search_string() SP() s:search_string() { SearchKey::Header(f, s) }
      "KEYWORD"i SP() s:$(atom()) { SearchKey::Keyword(String::from_utf8_lossy(s).into_owned()) }
      "LARGER"i SP() n:number() { SearchKey::Larger(n) }
      "NEW"i { SearchKey::New }
      "OLD"i { SearchKey::Old }
      "ON"i SP() d:date() { SearchKey::On(d) }
      "RECENT"i { SearchKey::Recent }
      "SEEN"i { SearchKey::Seen }
      "SENTBEFORE"i SP() d:date() { SearchKey::SentBefore(d) }
      "SENTON"i SP() d:date() { SearchKey::SentOn(d) }
      "SENTSINCE"i SP() d:date() { SearchKey::SentSince(d) }
      "SINCE"i SP() d:date() { SearchKey::Since(d) }
      "SMALLER"i SP() n:number() { SearchKey::Smaller(n) }
      "SUBJECT"i SP() s:search_string() { SearchKey::Subject(s) }
      "TEXT"i SP() s:search_string() { SearchKey::Text(s) }
      "TO"i SP() s:search_string() { SearchKey::To(s) }
      "UID"i SP() s:sequence_set() { SearchKey::Uid(s) }
      "UNANSWERED"i { SearchKey::Unanswered }
      "UNDELETED"i { SearchKey::Undeleted }
      "UNDRAFT"i { SearchKey::Undraft }
      "UNFLAGGED"i { SearchKey::Unflagged }
      "UNKEYWORD"i SP() s:$(atom()) { SearchKey::Unkeyword(String::from_utf8_lossy(s).into_owned()) }
      "UNSEEN"i { SearchKey::Unseen }
      s:sequence_set() { SearchKey::SequenceNumbers(s) }
    }

    rule search_return_opt() -> SearchReturn
      = "MIN"i { SearchReturn::Min } / "MAX"i { SearchReturn::Max } / "ALL"i { SearchReturn::All }
      / "COUNT"i { SearchReturn::Count } / "UPDATE"i { SearchReturn::Update }
    rule search_return() -> Vec<SearchReturn>
      = "RETURN"i SP() "(" rs:(search_return_opt() ** SP()) ")" { rs }
    rule search_partial() -> (u32, u32)
      = "PARTIAL"i SP() "(" a:nz_number() ":" b:nz_number() ")" { (a, b) }

    pub rule search_program() -> SearchCommand
      = charset:("CHARSET"i SP() c:$(atom()) SP() { String::from_utf8_lossy(c).into_owned() })?
        ret:(r:search_return() SP() { r })?
        partial:(p:search_partial() SP() { p })?
        key:search_key()
      { SearchCommand { charset, key, ret: ret.unwrap_or_default(), partial } }

    rule sort_key() -> SortKey
      = "ARRIVAL"i { SortKey::Arrival } / "CC"i { SortKey::Cc } / "DATE"i { SortKey::Date }
      / "FROM"i { SortKey::From } / "SIZE"i { SortKey::Size } / "SUBJECT"i { SortKey::Subject }
      / "TO"i { SortKey::To }
    rule sort_criterion() -> SortCriterion
      = "REVERSE"i SP() k:sort_key() { SortCriterion { key: k, reverse: true } }
      / k:sort_key() { SortCriterion { key: k, reverse: false } }
    rule sort_criteria() -> Vec<SortCriterion> = "(" cs:(sort_criterion() ** SP()) ")" { cs }

    rule section_text() -> String = s:$((!"]" [_])*) { String::from_utf8_lossy(s).into_owned() }
    rule section() -> Section = "[" s:section_text() "]" { Section { raw: s } }
    rule partial_range() -> (u32, u32)
      = "<" a:number() "." b:nz_number() ">" { (a, b) }

    rule fetch_att() -> FetchItem
      = "FLAGS"i { FetchItem::Flags }
      / "INTERNALDATE"i { FetchItem::InternalDate }
      / "RFC822.SIZE"i { FetchItem::Rfc822Size }
      / "UID"i { FetchItem::Uid }
      / "ENVELOPE"i { FetchItem::Envelope }
      / "BODYSTRUCTURE"i { FetchItem::BodyStructure }
      / "BODY.PEEK"i s:section() p:partial_range()?
        { FetchItem::BodySection { peek: true, section: s, partial: p } }
      / "BODY"i s:section() p:partial_range()?
        { FetchItem::BodySection { peek: false, section: s, partial: p } }
      / "BODY"i !"[" { FetchItem::Body }
      / "RFC822"i { FetchItem::BodySection { peek: false, section: Section { raw: String::new() }, partial: None } }
    rule fetch_att_list() -> Vec<FetchItem>
      = "ALL"i { vec![FetchItem::Flags, FetchItem::InternalDate, FetchItem::Rfc822Size, FetchItem::Envelope] }
      / "FAST"i { vec![FetchItem::Flags, FetchItem::InternalDate, FetchItem::Rfc822Size] }
      / "FULL"i { vec![FetchItem::Flags, FetchItem::InternalDate, FetchItem::Rfc822Size, FetchItem::Envelope, FetchItem::Body] }
      / "(" fs:(fetch_att() ** SP()) ")" { fs }
      / f:fetch_att() { vec![f] }

    rule store_op() -> (StoreOp, bool)
      = "+FLAGS.SILENT"i { (StoreOp::Add, true) }
      / "-FLAGS.SILENT"i { (StoreOp::Remove, true) }
      / "FLAGS.SILENT"i { (StoreOp::Set, true) }
      / "+FLAGS"i { (StoreOp::Add, false) }
      / "-FLAGS"i { (StoreOp::Remove, false) }
      / "FLAGS"i { (StoreOp::Set, false) }
    rule store_command() -> StoreCommand
      = u:("UNCHANGEDSINCE"i SP() n:number64() SP() { n })? op:store_op() SP() fs:flag_list()
      { StoreCommand { op: op.0, silent: op.1, flags: fs, unchangedsince: u } }

    rule status_item() -> StatusItem
      = "MESSAGES"i { StatusItem::Messages } / "RECENT"i { StatusItem::Recent }
      / "UIDNEXT"i { StatusItem::UidNext } / "UIDVALIDITY"i { StatusItem::UidValidity }
      / "UNSEEN"i { StatusItem::Unseen }
    rule status_items() -> Vec<StatusItem> = "(" ss:(status_item() ** SP()) ")" { ss }

    rule list_selection_opt() -> ListSelection
      = "SUBSCRIBED"i { ListSelection::Subscribed }
      / "REMOTE"i { ListSelection::RemoteAny }
    rule list_selection() -> Vec<ListSelection> = "(" ss:(list_selection_opt() ** SP()) ")" SP() { ss }
    rule list_ret_opt() -> Vec<StatusItem>
      = "RETURN"i SP() "(" opts:(
          ("CHILDREN"i { None } / "STATUS"i SP() s:status_items() { Some(s) })
        ** SP()) ")"
      { opts.into_iter().flatten().flatten().collect() }
    rule list_mailbox_pattern() -> Vec<u8> = s:astring() { s.into_owned() }

    pub rule list_command() -> ListCommand
      = sel:list_selection()?
        reference:list_mailbox_pattern() SP() pattern:list_mailbox_pattern()
        ret:(SP() r:list_ret_opt() { r })?
      { ListCommand { reference, pattern, selection: sel.unwrap_or_default(), status: ret.unwrap_or_default() } }

    rule append_flags() -> Vec<Flag> = f:(fl:flag_list() SP() { fl })? { f.unwrap_or_default() }
    rule append_date() -> Option<Date> = d:(dt:date() SP() { dt })? { d }
    rule append_message() -> AppendMessage
      = flags:append_flags() date:append_date() data:literal()
      { AppendMessage { flags, date, data: data.to_vec() } }

    rule base64() -> Vec<u8> = s:$([b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/' | b'=']*)
      { use base64::Engine as _; base64::engine::general_purpose::STANDARD.decode(s).unwrap_or_default() }

    rule command_kind() -> CommandKind
      = "CAPABILITY"i { CommandKind::Capability }
      / "NOOP"i { CommandKind::Noop }
      / "LOGOUT"i { CommandKind::Logout }
      / "STARTTLS"i { CommandKind::StartTls }
      / "AUTHENTICATE"i SP() "PLAIN"i initial:(SP() b:base64() { b })?
        { CommandKind::Authenticate { mechanism: AuthMechanism::Plain, initial } }
      / "LOGIN"i SP() u:astring() SP() p:astring()
        { CommandKind::Login { user: u.into_owned(), password: p.into_owned() } }
      / "SELECT"i SP() m:mailbox() { CommandKind::Select { mailbox: m, readonly: false } }
      / "EXAMINE"i SP() m:mailbox() { CommandKind::Select { mailbox: m, readonly: true } }
      / "CREATE"i SP() m:mailbox() { CommandKind::Create { mailbox: m } }
      / "DELETE"i SP() m:mailbox() { CommandKind::Delete { mailbox: m } }
      / "RENAME"i SP() f:mailbox() SP() t:mailbox() { CommandKind::Rename { from: f, to: t } }
      / "SUBSCRIBE"i SP() m:mailbox() { CommandKind::Subscribe { mailbox: m } }
      / "UNSUBSCRIBE"i SP() m:mailbox() { CommandKind::Unsubscribe { mailbox: m } }
      / "LSUB"i SP() r:list_mailbox_pattern() SP() p:list_mailbox_pattern()
        { CommandKind::Lsub { reference: r, pattern: p } }
      / "LIST"i SP() l:list_command() { CommandKind::List(l) }
      / "STATUS"i SP() m:mailbox() SP() items:status_items() { CommandKind::Status { mailbox: m, items } }
      / "APPEND"i SP() m:mailbox() SP() first:append_message() rest:(SP() a:append_message() { a })*
        { let mut ms = vec![first]; ms.extend(rest); CommandKind::Append { mailbox: m, messages: ms } }
      / "NAMESPACE"i { CommandKind::Namespace }
      / "IDLE"i { CommandKind::Idle }
      / "UNSELECT"i { CommandKind::Unselect }
      / "CHECK"i { CommandKind::Check }
      / "CLOSE"i { CommandKind::Close }
      / "EXPUNGE"i { CommandKind::Expunge }
      / "UID"i SP() "EXPUNGE"i SP() s:sequence_set() { CommandKind::UidExpunge { set: s } }
      / "UID"i SP() "SEARCH"i SP() c:search_program() { CommandKind::Search { uid: true, command: c } }
      / "SEARCH"i SP() c:search_program() { CommandKind::Search { uid: false, command: c } }
      / "UID"i SP() "SORT"i SP() crit:sort_criteria() SP() c:search_program()
        { CommandKind::Sort { uid: true, criteria: crit, search: c } }
      / "SORT"i SP() crit:sort_criteria() SP() c:search_program()
        { CommandKind::Sort { uid: false, criteria: crit, search: c } }
      / "UID"i SP() "FETCH"i SP() s:sequence_set() SP() items:fetch_att_list()
        { CommandKind::Fetch { uid: true, set: s, items } }
      / "FETCH"i SP() s:sequence_set() SP() items:fetch_att_list()
        { CommandKind::Fetch { uid: false, set: s, items } }
      / "UID"i SP() "STORE"i SP() s:sequence_set() SP() c:store_command()
        { CommandKind::Store { uid: true, set: s, command: c } }
      / "STORE"i SP() s:sequence_set() SP() c:store_command()
        { CommandKind::Store { uid: false, set: s, command: c } }
      / "UID"i SP() "COPY"i SP() s:sequence_set() SP() m:mailbox()
        { CommandKind::Copy { uid: true, set: s, mailbox: m } }
      / "COPY"i SP() s:sequence_set() SP() m:mailbox()
        { CommandKind::Copy { uid: false, set: s, mailbox: m } }
      / "UID"i SP() "MOVE"i SP() s:sequence_set() SP() m:mailbox()
        { CommandKind::Move { uid: true, set: s, mailbox: m } }
      / "MOVE"i SP() s:sequence_set() SP() m:mailbox()
        { CommandKind::Move { uid: false, set: s, mailbox: m } }
      / "CANCELUPDATE"i SP() t:quoted()
        { CommandKind::CancelUpdate { context_tag: String::from_utf8_lossy(&t).into_owned() } }

    pub rule command() -> Command<'input>
      = t:tag() SP() kind:command_kind() CRLF()
      { Command { tag: Cow::Borrowed(t), kind } }
  }
}
