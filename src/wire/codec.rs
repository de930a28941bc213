//! Entity encode/decode.
//!
//! Field orders are the interoperability contract; see the module docs of
//! [`crate::wire`] for separators.

use crate::error::ClientError;
use crate::messages::{ClientInformationSnapshot, LimitOrderBook, Trade};
use crate::types::{Order, OrderAction, OrderResult, OrderType, NULL_ID};
use crate::wire::record::{split_list, Fields, RecordWriter, FIELD_SEP, LIST_SEP, PAIR_SEP, SECTION_SEP};
use std::collections::BTreeMap;

const ORDER_FIELDS: usize = 14;
const TRADE_FIELDS: usize = 13;
const BOOK_SECTIONS: usize = 5;
const SNAPSHOT_SECTIONS: usize = 5;

/// `symbol,order_id,cancel_id,client_id,action,type,num_shares,limit_price,
/// genesis,gateway,enqueue,dequeue,order_serial_num,result`.
/// With `anonymize`, the client id is written as `NULL`.
pub fn encode_order(order: &Order, anonymize: bool) -> String {
    let client_id = if anonymize { NULL_ID } else { order.client_id.as_str() };
    let mut w = RecordWriter::new(FIELD_SEP);
    w.field(&order.symbol)
        .field(&order.order_id)
        .field(&order.cancel_id)
        .field(client_id)
        .field(order.action.code())
        .field(order.order_type.code())
        .field(order.num_shares)
        .field(order.limit_price)
        .field(order.genesis_timestamp)
        .field(order.gateway_timestamp)
        .field(order.enqueue_timestamp)
        .field(order.dequeue_timestamp)
        .field(order.order_serial_num)
        .field(order.result.code());
    w.finish()
}

pub fn decode_order(record: &str) -> Result<Order, ClientError> {
    let mut f = Fields::split(record, FIELD_SEP, ORDER_FIELDS, "order")?;
    Ok(Order {
        symbol: f.text(),
        order_id: f.text(),
        cancel_id: f.text(),
        client_id: f.text(),
        action: OrderAction::from_code(f.code()),
        order_type: OrderType::from_code(f.code()),
        num_shares: f.number("num_shares")?,
        limit_price: f.number("limit_price")?,
        genesis_timestamp: f.number("genesis_timestamp")?,
        gateway_timestamp: f.number("gateway_timestamp")?,
        enqueue_timestamp: f.number("enqueue_timestamp")?,
        dequeue_timestamp: f.number("dequeue_timestamp")?,
        order_serial_num: f.number("order_serial_num")?,
        result: OrderResult::from_code(f.code()),
    })
}

/// `symbol,buyer_serial,seller_serial,buyer_order_id,seller_order_id,
/// buyer_client_id,seller_client_id,exec_price,cash_traded,shares_traded,
/// creation,release,trade_serial_num`.
///
/// Each flag independently replaces that side's client id with `NULL`, so a
/// release can reveal a side's identity only on that side's own stream.
pub fn encode_trade(trade: &Trade, anonymize_buyer: bool, anonymize_seller: bool) -> String {
    let buyer = if anonymize_buyer { NULL_ID } else { trade.buyer_client_id.as_str() };
    let seller = if anonymize_seller { NULL_ID } else { trade.seller_client_id.as_str() };
    let mut w = RecordWriter::new(FIELD_SEP);
    w.field(&trade.symbol)
        .field(trade.buyer_serial_num)
        .field(trade.seller_serial_num)
        .field(&trade.buyer_order_id)
        .field(&trade.seller_order_id)
        .field(buyer)
        .field(seller)
        .field(trade.exec_price)
        .field(trade.cash_traded)
        .field(trade.shares_traded)
        .field(trade.creation_timestamp)
        .field(trade.release_timestamp)
        .field(trade.trade_serial_num);
    w.finish()
}

pub fn decode_trade(record: &str) -> Result<Trade, ClientError> {
    let mut f = Fields::split(record, FIELD_SEP, TRADE_FIELDS, "trade")?;
    Ok(Trade {
        symbol: f.text(),
        buyer_serial_num: f.number("buyer_serial_num")?,
        seller_serial_num: f.number("seller_serial_num")?,
        buyer_order_id: f.text(),
        seller_order_id: f.text(),
        buyer_client_id: f.text(),
        seller_client_id: f.text(),
        exec_price: f.number("exec_price")?,
        cash_traded: f.number("cash_traded")?,
        shares_traded: f.number("shares_traded")?,
        creation_timestamp: f.number("creation_timestamp")?,
        release_timestamp: f.number("release_timestamp")?,
        trade_serial_num: f.number("trade_serial_num")?,
    })
}

fn encode_order_list<'a>(
    orders: impl Iterator<Item = &'a Order>,
    max_orders: usize,
    anonymize: bool,
) -> String {
    let limit = if max_orders == 0 { usize::MAX } else { max_orders };
    let mut w = RecordWriter::new(LIST_SEP);
    for order in orders.take(limit) {
        w.field(encode_order(order, anonymize));
    }
    w.finish()
}

/// `symbol|creation|release|buy_orders|sell_orders`, each side a `;`-joined
/// list of order records in ascending order-id order.
///
/// `max_orders` caps each side (0 = unlimited); the first ids in key order are
/// kept, so repeated encodings of one book are byte-identical. `anonymize`
/// strips the client id from every contained order.
pub fn encode_book(book: &LimitOrderBook, max_orders: usize, anonymize: bool) -> String {
    let mut w = RecordWriter::new(SECTION_SEP);
    w.field(&book.symbol)
        .field(book.creation_timestamp)
        .field(book.release_timestamp)
        .field(encode_order_list(book.buy_queue.values(), max_orders, anonymize))
        .field(encode_order_list(book.sell_queue.values(), max_orders, anonymize));
    w.finish()
}

fn decode_book_side(section: &str, symbol: &str) -> Result<BTreeMap<String, Order>, ClientError> {
    let mut side = BTreeMap::new();
    for entry in split_list(section) {
        let order = decode_order(entry)?;
        if order.symbol != symbol {
            return Err(ClientError::malformed(
                "book",
                format!("order {} has symbol {}, book is {}", order.order_id, order.symbol, symbol),
            ));
        }
        let id = order.order_id.clone();
        if side.insert(id.clone(), order).is_some() {
            return Err(ClientError::malformed("book", format!("duplicate order id {}", id)));
        }
    }
    Ok(side)
}

pub fn decode_book(record: &str) -> Result<LimitOrderBook, ClientError> {
    let mut f = Fields::split(record, SECTION_SEP, BOOK_SECTIONS, "book")?;
    let symbol = f.text();
    let creation_timestamp = f.number("creation_timestamp")?;
    let release_timestamp = f.number("release_timestamp")?;
    let buy_queue = decode_book_side(f.raw(), &symbol)?;
    let sell_queue = decode_book_side(f.raw(), &symbol)?;
    Ok(LimitOrderBook {
        symbol,
        buy_queue,
        sell_queue,
        creation_timestamp,
        release_timestamp,
    })
}

/// `client_id|global_serial|order_serial|portfolio|outstanding_orders`, the
/// portfolio as `SYM:position` entries in ascending symbol order.
pub fn encode_snapshot(snapshot: &ClientInformationSnapshot) -> String {
    let mut portfolio = RecordWriter::new(LIST_SEP);
    for (symbol, position) in &snapshot.portfolio {
        portfolio.field(format!("{}{}{}", symbol, PAIR_SEP, position));
    }
    let mut w = RecordWriter::new(SECTION_SEP);
    w.field(&snapshot.client_id)
        .field(snapshot.global_serial_num)
        .field(snapshot.order_serial_num)
        .field(portfolio.finish())
        .field(encode_order_list(snapshot.outstanding_orders.iter(), 0, false));
    w.finish()
}

pub fn decode_snapshot(record: &str) -> Result<ClientInformationSnapshot, ClientError> {
    let mut f = Fields::split(record, SECTION_SEP, SNAPSHOT_SECTIONS, "snapshot")?;
    let client_id = f.text();
    let global_serial_num = f.number("global_serial_num")?;
    let order_serial_num = f.number("order_serial_num")?;

    let mut portfolio = BTreeMap::new();
    for entry in split_list(f.raw()) {
        let mut pair = Fields::split(entry, PAIR_SEP, 2, "snapshot")?;
        let symbol = pair.text();
        let position: i64 = pair.number("position")?;
        if portfolio.insert(symbol.clone(), position).is_some() {
            return Err(ClientError::malformed(
                "snapshot",
                format!("duplicate portfolio symbol {}", symbol),
            ));
        }
    }

    let outstanding_orders = split_list(f.raw())
        .map(decode_order)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ClientInformationSnapshot {
        client_id,
        global_serial_num,
        order_serial_num,
        portfolio,
        outstanding_orders,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamped_order(id: &str, client: &str, action: OrderAction, price: i64) -> Order {
        Order {
            symbol: "AA".into(),
            order_id: id.into(),
            cancel_id: NULL_ID.into(),
            client_id: client.into(),
            action,
            order_type: OrderType::Limit,
            num_shares: 100,
            limit_price: price,
            genesis_timestamp: 10,
            gateway_timestamp: 20,
            enqueue_timestamp: 30,
            dequeue_timestamp: 40,
            order_serial_num: 5,
            result: OrderResult::InSequencer,
        }
    }

    fn sample_trade() -> Trade {
        Trade {
            symbol: "AA".into(),
            buyer_serial_num: 1,
            seller_serial_num: 2,
            buyer_order_id: "G1-C1-1".into(),
            seller_order_id: "G1-C2-1".into(),
            buyer_client_id: "C1".into(),
            seller_client_id: "C2".into(),
            exec_price: 50,
            cash_traded: 5_000,
            shares_traded: 100,
            creation_timestamp: 1_000,
            release_timestamp: 101_000,
            trade_serial_num: 9,
        }
    }

    #[test]
    fn order_record_layout() {
        let o = stamped_order("G1-C1-1", "C1", OrderAction::Buy, 50);
        assert_eq!(
            encode_order(&o, false),
            "AA,G1-C1-1,NULL,C1,B,L,100,50,10,20,30,40,5,Q"
        );
        assert_eq!(decode_order(&encode_order(&o, false)).unwrap(), o);
    }

    #[test]
    fn anonymized_order_hides_client() {
        let o = stamped_order("G1-C1-1", "C1", OrderAction::Buy, 50);
        let decoded = decode_order(&encode_order(&o, true)).unwrap();
        assert_eq!(decoded.client_id, NULL_ID);
        assert_eq!(decoded.order_id, o.order_id);
    }

    #[test]
    fn unknown_codes_decode_to_defaults() {
        let decoded = decode_order("AA,NULL,NULL,C1,Z,Z,1,1,0,0,0,0,0,Z").unwrap();
        assert_eq!(decoded.action, OrderAction::Flush);
        assert_eq!(decoded.order_type, OrderType::Null);
        assert_eq!(decoded.result, OrderResult::Error);
    }

    #[test]
    fn malformed_orders() {
        assert!(matches!(
            decode_order("AA,NULL"),
            Err(ClientError::MalformedRecord { kind: "order", .. })
        ));
        assert!(matches!(
            decode_order("AA,NULL,NULL,C1,B,L,lots,1,0,0,0,0,0,V"),
            Err(ClientError::MalformedRecord { kind: "order", .. })
        ));
        assert!(decode_order("AA,NULL,NULL,C1,B,L,-1,1,0,0,0,0,0,V").is_err());
    }

    #[test]
    fn trade_anonymization_is_per_side() {
        let t = sample_trade();
        assert_eq!(decode_trade(&encode_trade(&t, false, false)).unwrap(), t);
        let buyer_view = decode_trade(&encode_trade(&t, false, true)).unwrap();
        assert_eq!(buyer_view.buyer_client_id, "C1");
        assert_eq!(buyer_view.seller_client_id, NULL_ID);
        let seller_view = decode_trade(&encode_trade(&t, true, false)).unwrap();
        assert_eq!(seller_view.buyer_client_id, NULL_ID);
        assert_eq!(seller_view.seller_client_id, "C2");
    }

    #[test]
    fn book_round_trip_and_truncation() {
        let mut book = LimitOrderBook::new("AA", 500);
        book.release_timestamp = 100_500;
        for (id, price) in [("c", 48), ("a", 50), ("b", 49)] {
            book.insert(stamped_order(id, "C1", OrderAction::Buy, price));
        }
        book.insert(stamped_order("z", "C2", OrderAction::Sell, 60));

        let full = encode_book(&book, 0, false);
        assert_eq!(decode_book(&full).unwrap(), book);
        assert_eq!(full, encode_book(&book.clone(), 0, false));

        let truncated = decode_book(&encode_book(&book, 2, true)).unwrap();
        let ids: Vec<&str> = truncated.buy_queue.keys().map(|k| k.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(truncated.sell_queue.len(), 1);
        assert!(truncated
            .buy_queue
            .values()
            .chain(truncated.sell_queue.values())
            .all(|o| o.client_id == NULL_ID));
    }

    #[test]
    fn empty_book_round_trip() {
        let book = LimitOrderBook::new("AB", 7);
        let record = encode_book(&book, 0, false);
        assert_eq!(record, "AB|7|0||");
        assert_eq!(decode_book(&record).unwrap(), book);
    }

    #[test]
    fn book_with_foreign_order_is_malformed() {
        let mut book = LimitOrderBook::new("AA", 1);
        book.insert(stamped_order("a", "C1", OrderAction::Buy, 50));
        let record = encode_book(&book, 0, false).replacen("|AA,", "|AB,", 1);
        assert!(matches!(
            decode_book(&record),
            Err(ClientError::MalformedRecord { kind: "book", .. })
        ));
    }

    #[test]
    fn snapshot_round_trip() {
        let mut snapshot = ClientInformationSnapshot {
            client_id: "C1".into(),
            global_serial_num: 42,
            order_serial_num: 7,
            ..Default::default()
        };
        snapshot.portfolio.insert("AB".into(), -300);
        snapshot.portfolio.insert("AA".into(), 100);
        snapshot
            .outstanding_orders
            .push(stamped_order("G1-C1-1", "C1", OrderAction::Buy, 50));
        snapshot
            .outstanding_orders
            .push(stamped_order("G1-C1-2", "C1", OrderAction::Sell, 55));

        let record = encode_snapshot(&snapshot);
        assert!(record.starts_with("C1|42|7|AA:100;AB:-300|"));
        assert_eq!(decode_snapshot(&record).unwrap(), snapshot);
    }

    #[test]
    fn snapshot_with_bad_portfolio_is_malformed() {
        assert!(decode_snapshot("C1|1|1|AA|").is_err());
        assert!(decode_snapshot("C1|1|1|AA:1;AA:2|").is_err());
        assert!(decode_snapshot("C1|1|1").is_err());
        let empty = decode_snapshot("C1|0|0||").unwrap();
        assert!(empty.portfolio.is_empty() && empty.outstanding_orders.is_empty());
    }
}
