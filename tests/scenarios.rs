//! 代表的な編集シナリオの結合テスト

use altre_doc::{Change, DocError, Engine, LinkOptions, MarkOptions, Pos};

fn p(line: usize, col: usize) -> Pos {
    Pos::new(line, col)
}

fn lines(engine: &Engine, doc: altre_doc::DocId) -> Vec<String> {
    let d = engine.doc(doc).unwrap();
    d.get_lines(d.first_line(), d.first_line() + d.line_count())
}

#[test]
fn replace_then_undo_restores_text() {
    let mut engine = Engine::default();
    let doc = engine.create_doc("abc\ndef");
    engine
        .apply(doc, Change::new(p(0, 1), p(0, 2), vec!["X".to_string()]))
        .unwrap();
    assert_eq!(lines(&engine, doc), vec!["aXc", "def"]);

    engine.undo(doc).unwrap();
    assert_eq!(lines(&engine, doc), vec!["abc", "def"]);
    engine.redo(doc).unwrap();
    assert_eq!(lines(&engine, doc), vec!["aXc", "def"]);
}

#[test]
fn collapsed_marker_moves_with_insertion_before_it() {
    let mut engine = Engine::default();
    let doc = engine.create_doc("abc\ndef");
    let fold = engine
        .mark_text(doc, p(0, 1), p(1, 1), MarkOptions::collapsed())
        .unwrap();

    engine.apply(doc, Change::insert(p(0, 0), "new\n")).unwrap();
    let range = engine.find_marker(fold).unwrap().unwrap();
    assert_eq!((range.from, range.to), (p(1, 1), p(2, 1)));
    assert_eq!(engine.doc(doc).unwrap().get_range(range.from, range.to), "bc\nd");
}

#[test]
fn collapsed_marker_grows_when_line_inserted_inside() {
    let mut engine = Engine::default();
    let doc = engine.create_doc("abc\ndef");
    let fold = engine
        .mark_text(doc, p(0, 1), p(1, 1), MarkOptions::collapsed())
        .unwrap();

    engine.apply(doc, Change::insert(p(0, 3), "\nxyz")).unwrap();
    let range = engine.find_marker(fold).unwrap().unwrap();
    assert_eq!((range.from, range.to), (p(0, 1), p(2, 1)));
    assert!(engine.line_is_hidden(doc, 1).unwrap());
    assert!(engine.line_is_hidden(doc, 2).unwrap());
}

#[test]
fn unshared_linked_history_is_rebased() {
    let mut engine = Engine::default();
    let a = engine.create_doc("a\nb\nc\nd\ne");
    let b = engine
        .link_doc(
            a,
            LinkOptions {
                from: Some(2),
                to: Some(4),
                ..LinkOptions::default()
            },
        )
        .unwrap();

    engine.apply(b, Change::insert(p(2, 0), "!")).unwrap();
    assert_eq!(engine.history_size(b).unwrap(), (1, 0));
    assert_eq!(engine.history_size(a).unwrap(), (0, 0));

    // 窓より前の編集はBのテキストに現れない
    engine.apply(a, Change::insert(p(0, 0), "x\n")).unwrap();
    assert_eq!(lines(&engine, b), vec!["!c", "d"]);
    assert_eq!(engine.doc(b).unwrap().first_line(), 3);

    engine.undo(a).unwrap();
    assert_eq!(engine.doc(b).unwrap().first_line(), 2);
    assert_eq!(engine.history_size(b).unwrap(), (1, 0));

    engine.undo(b).unwrap();
    assert_eq!(engine.doc(a).unwrap().get_value(), "a\nb\nc\nd\ne");
    assert_eq!(lines(&engine, b), vec!["c", "d"]);
}

#[test]
fn sequential_line_insertions_keep_store_shallow() {
    let mut engine = Engine::default();
    let doc = engine.create_doc("");
    let count = 10_000;
    for i in 0..count {
        engine.apply(doc, Change::insert(p(i, 0), "\n")).unwrap();
    }
    let d = engine.doc(doc).unwrap();
    assert_eq!(d.line_count(), count + 1);
    d.line_store().check_invariants().unwrap();

    // 葉は25行以上、分岐は5本以上を保つので深さは対数で抑えられる
    let bound = ((count as f64).log(5.0).ceil() as usize) + 1;
    assert!(
        d.line_store_depth() <= bound,
        "depth {} exceeds {}",
        d.line_store_depth(),
        bound
    );
    assert_eq!(d.height_at_line(count).unwrap(), count as f64);
}

#[test]
fn partially_overlapping_collapsed_marker_is_rejected() {
    let mut engine = Engine::default();
    let doc = engine.create_doc("abcdef\nghi");
    let first = engine
        .mark_text(doc, p(0, 1), p(0, 4), MarkOptions::collapsed())
        .unwrap();
    let before_height = engine.doc(doc).unwrap().total_height();

    let err = engine
        .mark_text(doc, p(0, 2), p(1, 1), MarkOptions::collapsed())
        .unwrap_err();
    assert_eq!(err, DocError::CollapsedConflict);

    assert_eq!(engine.all_marks(doc).unwrap(), vec![first]);
    assert_eq!(engine.doc(doc).unwrap().get_value(), "abcdef\nghi");
    assert_eq!(engine.doc(doc).unwrap().total_height(), before_height);
    assert!(!engine.line_is_hidden(doc, 1).unwrap());
}

#[test]
fn touching_inclusive_collapsed_markers_conflict() {
    let mut engine = Engine::default();
    let doc = engine.create_doc("abcdef");
    engine
        .mark_text(doc, p(0, 1), p(0, 3), MarkOptions::collapsed().inclusive_right(true))
        .unwrap();

    let err = engine
        .mark_text(doc, p(0, 3), p(0, 5), MarkOptions::collapsed().inclusive_left(true))
        .unwrap_err();
    assert_eq!(err, DocError::CollapsedConflict);

    // 端を含まなければ隣り合ってよい
    engine
        .mark_text(doc, p(0, 3), p(0, 5), MarkOptions::collapsed())
        .unwrap();
    // 入れ子は衝突ではない
    engine
        .mark_text(doc, p(0, 0), p(0, 6), MarkOptions::collapsed())
        .unwrap();
    assert_eq!(engine.all_marks(doc).unwrap().len(), 3);
}
