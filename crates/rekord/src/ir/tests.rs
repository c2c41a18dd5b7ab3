use super::compile;
use super::*;
use serde_json::json;

fn basic(column: &str, op: &str, value: Value, connector: Connector) -> Predicate {
    Predicate::Basic {
        column: column.to_string(),
        op: op.to_string(),
        value,
        connector,
    }
}

#[test]
fn simple_select() {
    let ir = SelectIr::new("users");
    let (sql, params) = compile::select(&ir);
    assert_eq!(sql, "SELECT * FROM users");
    assert!(params.is_empty());
}

#[test]
fn select_with_columns_and_distinct() {
    let mut ir = SelectIr::new("users");
    ir.columns = vec!["id".into(), "name".into()];
    ir.distinct = true;
    assert_eq!(compile::select(&ir).0, "SELECT DISTINCT id, name FROM users");
}

#[test]
fn where_connectors_and_order() {
    let mut ir = SelectIr::new("users");
    ir.wheres.push(basic("status", "=", json!("active"), Connector::And));
    ir.wheres.push(basic("age", ">", json!(18), Connector::And));
    ir.wheres.push(basic("vip", "=", json!(true), Connector::Or));
    let (sql, params) = compile::select(&ir);
    assert_eq!(
        sql,
        "SELECT * FROM users WHERE status = ? AND age > ? OR vip = ?"
    );
    assert_eq!(params, vec![json!("active"), json!(18), json!(true)]);
}

#[test]
fn predicate_bodies() {
    let mut ir = SelectIr::new("t");
    ir.wheres.push(Predicate::In {
        column: "id".into(),
        values: vec![json!(1), json!(2), json!(3)],
        connector: Connector::And,
    });
    ir.wheres.push(Predicate::IsNull {
        column: "deleted_at".into(),
        connector: Connector::And,
    });
    ir.wheres.push(Predicate::Between {
        column: "age".into(),
        low: json!(18),
        high: json!(65),
        connector: Connector::And,
    });
    ir.wheres.push(Predicate::Like {
        column: "name".into(),
        pattern: json!("A%"),
        connector: Connector::And,
    });
    let (sql, params) = compile::select(&ir);
    assert_eq!(
        sql,
        "SELECT * FROM t WHERE id IN (?, ?, ?) AND deleted_at IS NULL \
         AND age BETWEEN ? AND ? AND name LIKE ?"
    );
    assert_eq!(params.len(), 6);
}

#[test]
fn empty_in_lists_collapse() {
    let mut ir = SelectIr::new("t");
    ir.wheres.push(Predicate::In {
        column: "id".into(),
        values: vec![],
        connector: Connector::And,
    });
    ir.wheres.push(Predicate::NotIn {
        column: "id".into(),
        values: vec![],
        connector: Connector::And,
    });
    let (sql, params) = compile::select(&ir);
    assert_eq!(sql, "SELECT * FROM t WHERE 1 = 0 AND 1 = 1");
    assert!(params.is_empty());
}

#[test]
fn joins_preserve_insertion_order() {
    let mut ir = SelectIr::new("users");
    ir.joins.push(Join {
        kind: JoinKind::Inner,
        table: "posts".into(),
        left_col: "posts.user_id".into(),
        op: "=".into(),
        right_col: "users.id".into(),
    });
    ir.joins.push(Join {
        kind: JoinKind::Left,
        table: "profiles".into(),
        left_col: "profiles.user_id".into(),
        op: "=".into(),
        right_col: "users.id".into(),
    });
    assert_eq!(
        compile::select(&ir).0,
        "SELECT * FROM users \
         INNER JOIN posts ON posts.user_id = users.id \
         LEFT JOIN profiles ON profiles.user_id = users.id"
    );
}

#[test]
fn group_having_order_limit_offset() {
    let mut ir = SelectIr::new("orders");
    ir.group_bys.push("user_id".into());
    ir.havings.push(Having::Count {
        column: "*".into(),
        op: ">=".into(),
        value: json!(3),
    });
    ir.orders.push(Order {
        column: "user_id".into(),
        direction: Direction::Desc,
    });
    ir.limit = Some(10);
    ir.offset = Some(20);
    let (sql, params) = compile::select(&ir);
    assert_eq!(
        sql,
        "SELECT * FROM orders GROUP BY user_id HAVING COUNT(*) >= ? \
         ORDER BY user_id DESC LIMIT 10 OFFSET 20"
    );
    // limit/offset are inlined, never parameterized
    assert_eq!(params, vec![json!(3)]);
}

#[test]
fn param_vector_length_matches_value_bearing_predicates() {
    let mut ir = SelectIr::new("t");
    ir.wheres.push(basic("a", "=", json!(1), Connector::And));
    ir.wheres.push(Predicate::In {
        column: "b".into(),
        values: vec![json!(1), json!(2)],
        connector: Connector::And,
    });
    ir.wheres.push(Predicate::IsNotNull {
        column: "c".into(),
        connector: Connector::And,
    });
    ir.wheres.push(Predicate::Between {
        column: "d".into(),
        low: json!(0),
        high: json!(9),
        connector: Connector::Or,
    });
    let (_, params) = compile::select(&ir);
    assert_eq!(params.len(), ir.where_param_count());
    assert_eq!(params.len(), 5);
}

#[test]
fn count_ignores_orders_and_paging() {
    let mut ir = SelectIr::new("users");
    ir.wheres.push(basic("age", ">", json!(30), Connector::And));
    ir.orders.push(Order {
        column: "name".into(),
        direction: Direction::Asc,
    });
    ir.limit = Some(5);
    ir.offset = Some(10);
    let (sql, params) = compile::count(&ir);
    assert_eq!(sql, "SELECT COUNT(*) AS aggregate FROM users WHERE age > ?");
    assert_eq!(params.len(), 1);
}

#[test]
fn exists_probe() {
    let mut ir = SelectIr::new("users");
    ir.wheres.push(basic("id", "=", json!(7), Connector::And));
    assert_eq!(
        compile::exists(&ir).0,
        "SELECT 1 FROM users WHERE id = ? LIMIT 1"
    );
}

#[test]
fn insert_single_and_many() {
    let mut row = crate::value::Attributes::new();
    row.insert("name".into(), json!("Alice"));
    row.insert("age".into(), json!(30));
    let (sql, params) = compile::insert("users", std::slice::from_ref(&row));
    assert_eq!(sql, "INSERT INTO users (name, age) VALUES (?, ?)");
    assert_eq!(params, vec![json!("Alice"), json!(30)]);

    let mut second = crate::value::Attributes::new();
    second.insert("name".into(), json!("Bob"));
    let (sql, params) = compile::insert("users", &[row, second]);
    assert_eq!(sql, "INSERT INTO users (name, age) VALUES (?, ?), (?, ?)");
    // missing key on the second row becomes NULL
    assert_eq!(
        params,
        vec![json!("Alice"), json!(30), json!("Bob"), Value::Null]
    );
}

#[test]
fn update_set_params_precede_where_params() {
    let mut attrs = crate::value::Attributes::new();
    attrs.insert("name".into(), json!("Zoe"));
    attrs.insert("age".into(), json!(9));
    let wheres = vec![basic("id", "=", json!(4), Connector::And)];
    let (sql, params) = compile::update("users", &attrs, &wheres);
    assert_eq!(sql, "UPDATE users SET name = ?, age = ? WHERE id = ?");
    assert_eq!(params, vec![json!("Zoe"), json!(9), json!(4)]);
}

#[test]
fn delete_with_wheres() {
    let wheres = vec![basic("name", "=", json!("Alice"), Connector::And)];
    let (sql, params) = compile::delete("users", &wheres);
    assert_eq!(sql, "DELETE FROM users WHERE name = ?");
    assert_eq!(params.len(), 1);
}

#[test]
fn increment_parameterizes_delta_not_column() {
    let wheres = vec![basic("id", "=", json!(1), Connector::And)];
    let (sql, params) = compile::increment("users", "age", &json!(2), false, &wheres);
    assert_eq!(sql, "UPDATE users SET age = age + ? WHERE id = ?");
    assert_eq!(params, vec![json!(2), json!(1)]);

    let (sql, _) = compile::increment("users", "age", &json!(2), true, &wheres);
    assert_eq!(sql, "UPDATE users SET age = age - ? WHERE id = ?");
}
