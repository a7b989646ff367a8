use super::*;

#[test]
fn splits_plain_fields() {
    assert_eq!(parse_csv_line("6,12,604,4,N1,1 2 3"), ["6", "12", "604", "4", "N1", "1 2 3"]);
}

#[test]
fn quoted_comma_is_literal() {
    assert_eq!(parse_csv_line(r#"a,"b,c",d"#), ["a", "b,c", "d"]);
}

#[test]
fn quotes_are_dropped_and_empty_fields_kept() {
    assert_eq!(parse_csv_line(r#""x",,"#), ["x", "", ""]);
}

#[test]
fn lines_strip_carriage_returns() {
    let got: Vec<&str> = lines("a,b\r\nc,d\r\n").collect();
    assert_eq!(got, ["a,b", "c,d"]);
}
